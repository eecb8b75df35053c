//! Property-based tests for bay path generation.
//!
//! Random plant layouts and car speeds; every generated path must have the
//! segment count of its car type and per-segment times of `distance / speed`.

use std::sync::Arc;

use meltshop_core::config::{BayConfig, CarType, PlantConfig};
use meltshop_core::test_utils::approx_eq;
use meltshop_spatial::SpatialService;
use meltshop_spatial::path::{is_valid_path, total_distance};
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

fn arb_bay(i: usize) -> impl Strategy<Value = BayConfig> {
    (0.0..1000.0f64, 0.0..1000.0f64, 1.0..300.0f64, 1.0..300.0f64)
        .prop_map(move |(x, y, w, h)| BayConfig::new(format!("bay{}", i + 1), x, y, w, h))
}

fn arb_layout() -> impl Strategy<Value = (PlantConfig, f64)> {
    (1..=5usize, 1.0..500.0f64).prop_flat_map(|(n, speed)| {
        let bays: Vec<_> = (0..n).map(arb_bay).collect();
        bays.prop_map(move |bays| {
            let mut config = PlantConfig::with_bays(bays);
            config.car.speed = speed;
            (config, speed)
        })
    })
}

fn arb_car_type() -> impl Strategy<Value = CarType> {
    prop_oneof![
        Just(CarType::Tapping),
        Just(CarType::Treatment),
        Just(CarType::Rh)
    ]
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Rail-bound cars get two segments, RH cars one, and each segment costs
    /// exactly `distance / speed`.
    #[test]
    fn segment_count_and_cost((config, speed) in arb_layout(), car_type in arb_car_type(), a in 0..5usize, b in 0..5usize) {
        let ids: Vec<_> = config.bays.iter().map(|bay| bay.id.clone()).collect();
        let (from, to) = (&ids[a % ids.len()], &ids[b % ids.len()]);
        let mut service = SpatialService::new(Arc::new(config)).unwrap();

        let path = service.path_between_bays(from, to, car_type);
        let expected = if car_type == CarType::Rh { 1 } else { 2 };
        prop_assert_eq!(path.len(), expected);
        prop_assert!(is_valid_path(&path));
        for seg in &path {
            prop_assert!(approx_eq(seg.travel_time, seg.distance / speed));
        }
    }

    /// An L never beats the straight line, and both end at the same centres.
    #[test]
    fn l_path_no_shorter_than_direct((config, _speed) in arb_layout(), a in 0..5usize, b in 0..5usize) {
        let ids: Vec<_> = config.bays.iter().map(|bay| bay.id.clone()).collect();
        let (from, to) = (&ids[a % ids.len()], &ids[b % ids.len()]);
        let mut service = SpatialService::new(Arc::new(config)).unwrap();

        let rail = service.path_between_bays(from, to, CarType::Treatment);
        let direct = service.path_between_bays(from, to, CarType::Rh);
        prop_assert!(total_distance(&rail) + 1e-9 >= total_distance(&direct));
        prop_assert_eq!(rail[0].from, direct[0].from);
        prop_assert_eq!(rail[1].to, direct[0].to);
    }

    /// Cached answers are identical to the first computation.
    #[test]
    fn cache_is_transparent((config, _speed) in arb_layout(), car_type in arb_car_type()) {
        let ids: Vec<_> = config.bays.iter().map(|bay| bay.id.clone()).collect();
        let mut service = SpatialService::new(Arc::new(config)).unwrap();
        let first = service.path_between_bays(&ids[0], ids.last().unwrap(), car_type);
        let second = service.path_between_bays(&ids[0], ids.last().unwrap(), car_type);
        prop_assert_eq!(first, second);
        prop_assert_eq!(service.cache_stats().bay_path_hits, 1);
    }
}
