//! Integration test: the five reference transport scenarios, end to end
//! through the public API of the spatial and transport crates.

use std::sync::Arc;

use meltshop_core::config::{CarType, FleetEntry};
use meltshop_core::id::{CarId, EquipmentId, HeatId, LadleId, RequestId, StationId};
use meltshop_core::sim::{SimTime, Step};
use meltshop_core::station::Ladle;
use meltshop_core::test_utils::*;
use meltshop_spatial::SpatialService;
use meltshop_transport::car::{Car, CarError, TransportLeg};
use meltshop_transport::event::{EventBus, EventKind, TransportEvent};
use meltshop_transport::{CarStatus, CraneState, CraneTask, Plant, TaskAdmission, TransportStatus};
use slotmap::SlotMap;

fn car_statuses(plant: &Plant, car: CarId) -> Vec<CarStatus> {
    plant
        .events()
        .iter()
        .filter_map(|e| match e {
            TransportEvent::CarStatusChanged { car: c, to, .. } if *c == car => Some(*to),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scenario 1: direct assignment
// ---------------------------------------------------------------------------

#[test]
fn scenario_1_direct_assignment() {
    let mut plant = Plant::new(one_bay_config()).unwrap();
    let furnace = RecordingStation::new("EAF_1", "bay1").with_ladle(Ladle::new(LadleId(1), None));
    let target = RecordingStation::new("LMF_1", "bay1");
    let log = target.log();
    let furnace = plant.add_station(Box::new(furnace), pos(20.0, 30.0)).unwrap();
    let target = plant.add_station(Box::new(target), pos(75.0, 60.0)).unwrap();

    plant.request_transport(heat(1), furnace, target, 0).unwrap();

    // Assigned immediately, before any simulated time passes.
    let car = match plant.check_transport_status(HeatId(1)) {
        TransportStatus::InTransit { car, status, .. } => {
            assert_eq!(status, CarStatus::Loading);
            car
        }
        other => panic!("expected in transit, got {other:?}"),
    };
    assert_eq!(plant.dispatcher().pending_count(), 0);
    assert_eq!(plant.dispatcher().car(car).unwrap().car_type(), CarType::Tapping);

    plant.run_until(SimTime(240.0));

    assert_eq!(
        car_statuses(&plant, car),
        vec![
            CarStatus::Loading,
            CarStatus::Moving,
            CarStatus::Unloading,
            CarStatus::Idle
        ]
    );
    assert_eq!(log.borrow().add_heat_calls, 1);
    assert_eq!(log.borrow().delivered, vec![HeatId(1)]);
    assert_eq!(plant.check_transport_status(HeatId(1)), TransportStatus::NotInTransport);
}

// ---------------------------------------------------------------------------
// Scenario 2: queueing under contention
// ---------------------------------------------------------------------------

#[test]
fn scenario_2_queueing_under_contention() {
    let mut plant = Plant::new(one_bay_config()).unwrap();
    let a = plant
        .add_station(Box::new(RecordingStation::new("EAF_1", "bay1")), pos(10.0, 10.0))
        .unwrap();
    let b = RecordingStation::new("LMF_1", "bay1");
    let log = b.log();
    let b = plant.add_station(Box::new(b), pos(90.0, 90.0)).unwrap();

    plant.request_transport(heat(1), a, b, 0).unwrap();
    let second = plant.request_transport(heat(2), a, b, 0).unwrap();
    assert!(plant.check_transport_status(HeatId(2)).is_pending());

    // Step until the first car finishes; the second request must still be
    // pending right up to that moment.
    let car = plant.dispatcher().cars().next().unwrap().id();
    while log.borrow().delivered.is_empty() {
        assert!(plant.check_transport_status(HeatId(2)).is_pending());
        assert!(plant.step());
    }
    let idle_at = plant
        .events()
        .iter()
        .find_map(|e| match e {
            TransportEvent::CarStatusChanged { car: c, to: CarStatus::Idle, at, .. } if *c == car => {
                Some(*at)
            }
            _ => None,
        })
        .unwrap();
    let assigned_at = plant
        .events()
        .iter()
        .find_map(|e| match e {
            TransportEvent::CarAssigned { request, at, .. } if *request == second => Some(*at),
            _ => None,
        })
        .unwrap();
    assert_eq!(assigned_at, idle_at);
    assert!(plant.check_transport_status(HeatId(2)).is_in_transit());

    plant.run_for(240.0);
    assert_eq!(log.borrow().delivered, vec![HeatId(1), HeatId(2)]);
}

// ---------------------------------------------------------------------------
// Scenario 3: crane requeue
// ---------------------------------------------------------------------------

#[test]
fn scenario_3_crane_requeue() {
    let mut plant = Plant::new(one_bay_config()).unwrap();
    let ids: Vec<StationId> = [(10.0, 10.0), (90.0, 10.0), (10.0, 90.0), (90.0, 90.0)]
        .into_iter()
        .enumerate()
        .map(|(i, (x, y))| {
            let station = RecordingStation::new(&format!("S{i}"), "bay1");
            plant.add_station(Box::new(station), pos(x, y)).unwrap()
        })
        .collect();
    let crane = plant.dispatcher().cranes().ids().next().unwrap();

    let first = CraneTask {
        source: EquipmentId::Station(ids[0]),
        destination: EquipmentId::Station(ids[1]),
        priority: 0,
    };
    assert!(matches!(
        plant.assign_crane_task(crane, first).unwrap(),
        TaskAdmission::Started { .. }
    ));
    assert_eq!(plant.dispatcher().crane(crane).unwrap().state(), CraneState::Moving);

    let second = CraneTask {
        source: EquipmentId::Station(ids[2]),
        destination: EquipmentId::Station(ids[3]),
        priority: 5,
    };
    let admission = plant.assign_crane_task(crane, second).unwrap();
    assert_eq!(admission, TaskAdmission::Queued);
    assert_eq!(admission.estimate(), 0.0);

    let c = plant.dispatcher().crane(crane).unwrap();
    assert_eq!(c.current_task(), Some(&first));
    assert_eq!(c.queued_tasks(), vec![second]);
    assert_eq!(c.state(), CraneState::Moving);
}

// ---------------------------------------------------------------------------
// Scenario 4: invalid path rejection
// ---------------------------------------------------------------------------

#[test]
fn scenario_4_invalid_path_rejection() {
    let mut spatial = SpatialService::new(Arc::new(two_bay_config())).unwrap();
    let mut events = EventBus::new(64);
    let mut stations = SlotMap::<StationId, ()>::with_key();
    let mut cars = SlotMap::<CarId, ()>::with_key();

    let entry = FleetEntry {
        number: 1,
        car_type: CarType::Treatment,
        home_bay: bay("bay1"),
    };
    let home = spatial.bay_center(&bay("bay1"));
    let mut car = Car::new(cars.insert(()), &entry, home, &spatial.config().car).unwrap();

    let leg = TransportLeg {
        request: RequestId(1),
        pickup: stations.insert(()),
        drop_off: stations.insert(()),
        to_bay: bay("no-such-bay"),
        priority: 0,
    };
    let rejected = car
        .assign_heat(SimTime::ZERO, heat(4), leg, &mut spatial, &mut events)
        .unwrap_err();

    assert!(matches!(rejected.reason, CarError::InvalidPath { .. }));
    assert_eq!(rejected.heat.id(), HeatId(4));
    assert_eq!(car.status(), CarStatus::Idle);
    assert!(car.path().is_empty());
    assert!(car.leg().is_none());
    assert!(car.is_available());
    assert_eq!(events.of_kind(EventKind::CarStatusChanged).count(), 0);
}

// ---------------------------------------------------------------------------
// Scenario 5: error recovery
// ---------------------------------------------------------------------------

#[test]
fn scenario_5_error_recovery() {
    let mut plant = Plant::new(one_bay_config()).unwrap();
    let crane = plant.dispatcher().cranes().ids().next().unwrap();
    let home = plant.dispatcher().crane(crane).unwrap().position();

    // A faulty station right under the crane: no travel, so the failure
    // happens when the lift completes.
    let broken = plant
        .add_station(Box::new(RecordingStation::faulty("EAF_1", "bay1")), home)
        .unwrap();
    let target = plant
        .add_station(Box::new(RecordingStation::new("LMF_1", "bay1")), pos(90.0, 90.0))
        .unwrap();
    let task = CraneTask {
        source: EquipmentId::Station(broken),
        destination: EquipmentId::Station(target),
        priority: 0,
    };
    plant.assign_crane_task(crane, task).unwrap();

    let lift = plant.config().crane.lift_height / plant.config().crane.hoist_speed
        + plant.config().crane.lift_base_time;
    let cooldown = plant.config().crane.error_cooldown;

    plant.run_until(SimTime(lift + cooldown / 2.0));
    let c = plant.dispatcher().crane(crane).unwrap();
    assert_eq!(c.state(), CraneState::Error);
    assert_eq!(c.error_count(), 1);
    assert_eq!(plant.events().of_kind(EventKind::CraneFault).count(), 1);

    plant.run_until(SimTime(lift + cooldown + 0.5));
    let c = plant.dispatcher().crane(crane).unwrap();
    assert_eq!(c.state(), CraneState::Idle);
    assert!(c.current_task().is_none());
    assert!(c.carried_ladle().is_none());
    assert_eq!(c.error_count(), 1);
    assert_eq!(c.tasks_completed(), 0);

    let recovered_at = plant
        .events()
        .iter()
        .find_map(|e| match e {
            TransportEvent::CraneStateChanged {
                from: CraneState::Error,
                to: CraneState::Idle,
                at,
                ..
            } => Some(*at),
            _ => None,
        })
        .unwrap();
    assert!((recovered_at.minutes() - (lift + cooldown)).abs() < 1e-9);
}

#[test]
fn failed_car_turn_cools_down_before_redispatch() {
    let mut spatial = SpatialService::new(Arc::new(one_bay_config())).unwrap();
    let config = spatial.config().clone();
    let mut cranes = meltshop_transport::dispatcher::CranePool::build(&spatial).unwrap();
    let mut stations: SlotMap<StationId, Box<dyn meltshop_core::station::Station>> =
        SlotMap::with_key();
    let pickup = stations.insert(Box::new(RecordingStation::new("EAF_1", "bay1")));
    spatial
        .place_equipment(EquipmentId::Station(pickup), &bay("bay1"), pos(20.0, 20.0))
        .unwrap();
    let mut ghosts = SlotMap::<StationId, ()>::with_key();
    ghosts.insert(());
    let missing = ghosts.insert(());

    let mut events = EventBus::new(64);
    let mut ids = SlotMap::<CarId, ()>::with_key();
    let entry = FleetEntry {
        number: 1,
        car_type: CarType::Tapping,
        home_bay: bay("bay1"),
    };
    let id = ids.insert(());
    let home = spatial.bay_center(&bay("bay1"));
    spatial
        .place_equipment(EquipmentId::Car(id), &bay("bay1"), home)
        .unwrap();
    let mut car = Car::new(id, &entry, home, &config.car).unwrap();
    let leg = TransportLeg {
        request: RequestId(1),
        pickup,
        drop_off: missing,
        to_bay: bay("bay1"),
        priority: 0,
    };
    car.assign_heat(SimTime::ZERO, heat(1), leg, &mut spatial, &mut events)
        .unwrap();

    let mut now = SimTime::ZERO;
    let mut turn = |car: &mut Car, now: SimTime| {
        let mut ctx = meltshop_transport::car::CarCtx {
            spatial: &mut spatial,
            cranes: &mut cranes,
            stations: &mut stations,
            events: &mut events,
            became_idle: false,
        };
        let step = car.resume(now, &mut ctx);
        (step, ctx.became_idle)
    };

    // Run until the unloading turn fails on the missing station.
    let cooldown = loop {
        let (step, _) = turn(&mut car, now);
        if car.status() == CarStatus::Idle {
            break step;
        }
        match step {
            Step::Hold(d) => now = now + d,
            Step::Passivate => panic!("car passivated mid-transport"),
        }
    };
    assert_eq!(cooldown, Step::Hold(config.car.error_cooldown));
    assert!(!car.is_available());
    assert_eq!(car.heat_id(), None);

    let (step, became_idle) = turn(&mut car, now + config.car.error_cooldown);
    assert_eq!(step, Step::Passivate);
    assert!(became_idle);
    assert!(car.is_available());
}
