//! Fleet ownership and request routing.
//!
//! The [`Dispatcher`] owns every car and, through the [`CranePool`], every
//! crane. Transport requests wait in a priority queue until an available
//! car of the required type exists. The drain is strict: the first request
//! that cannot be served stops the drain, so a lower-priority request is
//! never served ahead of a blocked higher-priority one.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;

use meltshop_core::config::{CarType, ConfigError, PlantConfig};
use meltshop_core::geometry::Position;
use meltshop_core::id::{BayId, CarId, CraneId, EquipmentId, HeatId, RequestId, StationId};
use meltshop_core::sim::SimTime;
use meltshop_core::station::Heat;
use meltshop_spatial::SpatialService;
use slotmap::SlotMap;
use tracing::{debug, error, info, warn};

use crate::car::{Car, TransportLeg};
use crate::crane::{Crane, CraneTask, TaskAdmission};
use crate::event::{EventBus, TransportEvent};
use crate::metrics::CraneMetrics;
use crate::query::{CarSnapshot, CraneSnapshot, PlantStatus, TransportStatus};

// ---------------------------------------------------------------------------
// Crane pool
// ---------------------------------------------------------------------------

/// Which end of a transport a crane is wanted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CraneOperation {
    Loading,
    Unloading,
}

/// Per-bay crane pools.
#[derive(Debug, Default)]
pub struct CranePool {
    cranes: SlotMap<CraneId, Crane>,
    by_bay: BTreeMap<BayId, Vec<CraneId>>,
}

impl CranePool {
    /// `count_per_bay` cranes in every configured bay, parked side by side
    /// from the bay's crane home.
    pub fn build(spatial: &SpatialService) -> Result<Self, ConfigError> {
        let config = spatial.config();
        let count = config.crane.count_per_bay;
        let spacing = config.spatial.crane_width * 1.5;
        let mut pool = Self::default();
        for bay in spatial.bay_ids() {
            let home = spatial.crane_home_position(bay);
            let bounds = spatial.bay_bounds(bay);
            for number in 1..=count {
                let mut spot = Position::new(home.x + spacing * f64::from(number - 1), home.y);
                if let Some(rect) = bounds {
                    spot.x = spot.x.min(rect.bottom_right.x);
                }
                let id = pool.cranes.try_insert_with_key(|id| {
                    Crane::new(id, bay.clone(), number, spot, &config.crane)
                })?;
                pool.by_bay.entry(bay.clone()).or_default().push(id);
            }
        }
        info!(cranes = pool.cranes.len(), bays = pool.by_bay.len(), "crane pool built");
        Ok(pool)
    }

    /// The first available crane in `bay`, in creation order. No queuing:
    /// callers poll.
    pub fn request_crane(&self, bay: &BayId, operation: CraneOperation) -> Option<CraneId> {
        let found = self
            .in_bay(bay)
            .iter()
            .copied()
            .find(|id| self.cranes.get(*id).is_some_and(Crane::is_available));
        if found.is_none() {
            debug!(%bay, ?operation, "no crane available");
        }
        found
    }

    /// Hand `task` to a crane. Unknown ids are rejected.
    pub fn assign(
        &mut self,
        id: CraneId,
        now: SimTime,
        task: CraneTask,
        spatial: &SpatialService,
        events: &mut EventBus,
    ) -> TaskAdmission {
        match self.cranes.get_mut(id) {
            Some(crane) => crane.assign_task(now, task, spatial, events),
            None => {
                warn!(?id, "task for unknown crane");
                TaskAdmission::Rejected
            }
        }
    }

    pub fn get(&self, id: CraneId) -> Option<&Crane> {
        self.cranes.get(id)
    }

    pub fn get_mut(&mut self, id: CraneId) -> Option<&mut Crane> {
        self.cranes.get_mut(id)
    }

    pub fn in_bay(&self, bay: &BayId) -> &[CraneId] {
        self.by_bay.get(bay).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ids(&self) -> impl Iterator<Item = CraneId> + '_ {
        self.cranes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Crane> {
        self.cranes.values()
    }

    pub fn len(&self) -> usize {
        self.cranes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cranes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Endpoints of a transport, resolved by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub from_station: StationId,
    pub from_bay: BayId,
    pub to_station: StationId,
    pub to_bay: BayId,
    pub to_caster: bool,
}

/// A heat waiting for a car.
#[derive(Debug)]
pub struct TransportRequest {
    pub id: RequestId,
    pub heat: Box<dyn Heat>,
    pub heat_id: HeatId,
    pub from_station: StationId,
    pub to_station: StationId,
    pub from_bay: BayId,
    pub to_bay: BayId,
    pub required_car_type: CarType,
    pub priority: i32,
    pub submitted_at: SimTime,
}

/// Heap entry: lower priority value first, then earlier submission, then
/// lower request id. `BinaryHeap` is a max-heap, so the order is reversed.
#[derive(Debug)]
struct Pending(TransportRequest);

impl Pending {
    fn key(&self) -> (i32, SimTime, RequestId) {
        (self.0.priority, self.0.submitted_at, self.0.id)
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        let (p, t, id) = self.key();
        let (op, ot, oid) = other.key();
        op.cmp(&p).then(ot.cmp(&t)).then(oid.cmp(&id))
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Dispatcher {
    config: Arc<PlantConfig>,
    pub(crate) cars: SlotMap<CarId, Car>,
    pub(crate) cranes: CranePool,
    pending: BinaryHeap<Pending>,
    next_request: u64,
}

impl Dispatcher {
    /// Build the fleet and the crane pools. Cars start at their home bay's
    /// centre and are registered with `spatial`.
    pub fn new(config: Arc<PlantConfig>, spatial: &mut SpatialService) -> Result<Self, ConfigError> {
        config.validate()?;
        let cranes = CranePool::build(spatial)?;

        let mut cars = SlotMap::with_key();
        for entry in config.fleet.plan(&config.bays) {
            let home = spatial.bay_center(&entry.home_bay);
            let id = cars.try_insert_with_key(|id| Car::new(id, &entry, home, &config.car))?;
            if let Err(err) = spatial.place_equipment(EquipmentId::Car(id), &entry.home_bay, home) {
                error!(car = entry.number, error = %err, "car not registered with spatial service");
            }
        }
        info!(cars = cars.len(), cranes = cranes.len(), "dispatcher ready");

        Ok(Self {
            config,
            cars,
            cranes,
            pending: BinaryHeap::new(),
            next_request: 0,
        })
    }

    /// Car type for a move, from the configured policy.
    pub fn classify(&self, from_bay: &BayId, to_bay: &BayId, to_caster: bool) -> CarType {
        self.config
            .dispatch
            .car_types
            .classify(from_bay == to_bay, to_caster)
    }

    /// Queue a transport and try to assign it right away.
    pub fn request_transport(
        &mut self,
        now: SimTime,
        heat: Box<dyn Heat>,
        route: Route,
        priority: i32,
        spatial: &mut SpatialService,
        events: &mut EventBus,
    ) -> RequestId {
        self.next_request += 1;
        let id = RequestId(self.next_request);
        let car_type = self.classify(&route.from_bay, &route.to_bay, route.to_caster);
        let heat_id = heat.id();
        info!(
            request = id.0,
            heat = %heat_id,
            from = %route.from_bay,
            to = %route.to_bay,
            %car_type,
            priority,
            "transport requested"
        );
        events.emit(TransportEvent::RequestQueued {
            request: id,
            heat: heat_id,
            car_type,
            priority,
            at: now,
        });
        self.pending.push(Pending(TransportRequest {
            id,
            heat,
            heat_id,
            from_station: route.from_station,
            to_station: route.to_station,
            from_bay: route.from_bay,
            to_bay: route.to_bay,
            required_car_type: car_type,
            priority,
            submitted_at: now,
        }));
        self.process_pending(now, spatial, events);
        id
    }

    /// Assign pending requests in priority order. Stops at the first
    /// request that cannot be served, or after the configured number of
    /// assignments. Returns the number assigned.
    pub fn process_pending(
        &mut self,
        now: SimTime,
        spatial: &mut SpatialService,
        events: &mut EventBus,
    ) -> usize {
        let limit = self.config.dispatch.max_assignments_per_drain;
        let mut assigned = 0;
        while assigned < limit {
            let Some(Pending(mut request)) = self.pending.pop() else {
                break;
            };
            let Some(car_id) = self.closest_available(&request, spatial) else {
                debug!(request = request.id.0, car_type = %request.required_car_type, "no car available");
                self.pending.push(Pending(request));
                break;
            };
            let Some(car) = self.cars.get_mut(car_id) else {
                self.pending.push(Pending(request));
                break;
            };
            let leg = TransportLeg {
                request: request.id,
                pickup: request.from_station,
                drop_off: request.to_station,
                to_bay: request.to_bay.clone(),
                priority: request.priority,
            };
            match car.assign_heat(now, request.heat, leg, spatial, events) {
                Ok(()) => {
                    info!(request = request.id.0, heat = %request.heat_id, car = car.name(), "request assigned");
                    events.emit(TransportEvent::CarAssigned {
                        request: request.id,
                        heat: request.heat_id,
                        car: car_id,
                        at: now,
                    });
                    assigned += 1;
                }
                Err(rejected) => {
                    warn!(request = request.id.0, error = %rejected.reason, "assignment failed, requeued");
                    request.heat = rejected.heat;
                    self.pending.push(Pending(request));
                    break;
                }
            }
        }
        if assigned == limit && !self.pending.is_empty() {
            debug!(pending = self.pending.len(), "drain bound reached");
        }
        assigned
    }

    /// Available car of the request's type nearest the origin bay. Ties go
    /// to the car created first.
    fn closest_available(&self, request: &TransportRequest, spatial: &SpatialService) -> Option<CarId> {
        let fallback = self.config.dispatch.fallback_bay_distance;
        self.cars
            .iter()
            .filter(|(_, car)| car.car_type() == request.required_car_type && car.is_available())
            .map(|(id, car)| {
                let distance = spatial
                    .bay_distance(car.current_bay(), &request.from_bay)
                    .unwrap_or(fallback);
                (id, distance)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    pub fn request_crane(&self, bay: &BayId, operation: CraneOperation) -> Option<CraneId> {
        self.cranes.request_crane(bay, operation)
    }

    // -- Queries --

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pending requests in service order.
    pub fn pending_requests(&self) -> Vec<&TransportRequest> {
        let mut entries: Vec<&Pending> = self.pending.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|p| &p.0).collect()
    }

    pub fn car(&self, id: CarId) -> Option<&Car> {
        self.cars.get(id)
    }

    pub fn cars(&self) -> impl Iterator<Item = &Car> {
        self.cars.values()
    }

    pub fn crane(&self, id: CraneId) -> Option<&Crane> {
        self.cranes.get(id)
    }

    pub fn cranes(&self) -> &CranePool {
        &self.cranes
    }

    pub fn status(&self, now: SimTime) -> PlantStatus {
        PlantStatus {
            now,
            pending_requests: self.pending.len(),
            cars: self.cars.values().map(CarSnapshot::of).collect(),
            cranes: self.cranes.iter().map(CraneSnapshot::of).collect(),
        }
    }

    pub fn crane_metrics(&self, now: SimTime) -> Vec<CraneMetrics> {
        self.cranes.iter().map(|c| c.metrics(now)).collect()
    }

    /// Mean crane utilization; 0 without cranes.
    pub fn utilization(&self, now: SimTime) -> f64 {
        if self.cranes.is_empty() {
            return 0.0;
        }
        let total: f64 = self.cranes.iter().map(|c| c.utilization(now)).sum();
        total / self.cranes.len() as f64
    }

    pub fn check_transport_status(&self, heat: HeatId, now: SimTime) -> TransportStatus {
        if let Some(request) = self.pending.iter().map(|p| &p.0).find(|r| r.heat_id == heat) {
            return TransportStatus::Pending {
                request: request.id,
                submitted_at: request.submitted_at,
                waiting_time: now.since(request.submitted_at),
                required_car_type: request.required_car_type,
                priority: request.priority,
            };
        }
        match self.cars.values().find(|c| c.heat_id() == Some(heat)) {
            Some(car) => TransportStatus::InTransit {
                car: car.id(),
                request: car.leg().map(|leg| leg.request),
                car_name: car.name().to_string(),
                status: car.status(),
                current_bay: car.current_bay().clone(),
                destination_bay: car.destination().cloned(),
                progress: car.progress(),
            },
            None => TransportStatus::NotInTransport,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::CarStatus;
    use meltshop_core::test_utils::*;

    struct Rig {
        spatial: SpatialService,
        dispatcher: Dispatcher,
        events: EventBus,
        stations: SlotMap<StationId, ()>,
    }

    fn rig(config: PlantConfig) -> Rig {
        let config = Arc::new(config);
        let mut spatial = SpatialService::new(Arc::clone(&config)).unwrap();
        let dispatcher = Dispatcher::new(config, &mut spatial).unwrap();
        Rig {
            spatial,
            dispatcher,
            events: EventBus::new(256),
            stations: SlotMap::with_key(),
        }
    }

    impl Rig {
        fn route(&mut self, from: &str, to: &str) -> Route {
            Route {
                from_station: self.stations.insert(()),
                from_bay: bay(from),
                to_station: self.stations.insert(()),
                to_bay: bay(to),
                to_caster: false,
            }
        }

        fn request(&mut self, id: u64, from: &str, to: &str, priority: i32) -> RequestId {
            let route = self.route(from, to);
            self.dispatcher.request_transport(
                SimTime(id as f64),
                heat(id),
                route,
                priority,
                &mut self.spatial,
                &mut self.events,
            )
        }
    }

    #[test]
    fn fleet_follows_explicit_counts() {
        let mut config = two_bay_config();
        config.fleet.per_type.insert(CarType::Tapping, 2);
        config.fleet.per_type.insert(CarType::Rh, 1);
        let r = rig(config);
        let names: Vec<_> = r.dispatcher.cars().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["TappingCar_1", "TappingCar_2", "RhCar_3"]);
        assert_eq!(r.dispatcher.cranes().len(), 2);
        for car in r.dispatcher.cars() {
            assert!(r.spatial.is_placed(EquipmentId::Car(car.id())));
        }
    }

    #[test]
    fn second_crane_parks_beside_the_first() {
        let mut config = one_bay_config();
        config.crane.count_per_bay = 2;
        let r = rig(config);
        let cranes: Vec<_> = r.dispatcher.cranes().iter().collect();
        assert_eq!(cranes[0].name(), "bay1_crane_1");
        assert_eq!(cranes[1].name(), "bay1_crane_2");
        assert_eq!(cranes[1].position().x - cranes[0].position().x, 30.0);
        assert_eq!(cranes[0].position().y, cranes[1].position().y);
    }

    #[test]
    fn classification_uses_policy() {
        let r = rig(two_bay_config());
        let d = &r.dispatcher;
        assert_eq!(d.classify(&bay("bay1"), &bay("bay1"), false), CarType::Tapping);
        assert_eq!(d.classify(&bay("bay1"), &bay("bay2"), false), CarType::Treatment);
        assert_eq!(d.classify(&bay("bay1"), &bay("bay1"), true), CarType::Rh);
    }

    #[test]
    fn request_is_assigned_immediately() {
        let mut r = rig(one_bay_config());
        let id = r.request(1, "bay1", "bay1", 0);
        assert_eq!(r.dispatcher.pending_count(), 0);
        let car = r.dispatcher.cars().next().unwrap();
        assert_eq!(car.status(), CarStatus::Loading);
        assert_eq!(car.heat_id(), Some(HeatId(1)));
        assert_eq!(car.leg().map(|leg| leg.request), Some(id));
        match r.dispatcher.check_transport_status(HeatId(1), SimTime(1.0)) {
            TransportStatus::InTransit { car: on, request, status, .. } => {
                assert_eq!(on, car.id());
                assert_eq!(request, Some(id));
                assert_eq!(status, CarStatus::Loading);
            }
            other => panic!("expected in transit, got {other:?}"),
        }
        let assigned: Vec<_> = r
            .events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::CarAssigned { request, car, .. } => Some((*request, *car)),
                _ => None,
            })
            .collect();
        assert_eq!(assigned, vec![(id, car.id())]);
    }

    #[test]
    fn second_request_waits_for_the_only_car() {
        let mut r = rig(one_bay_config());
        r.request(1, "bay1", "bay1", 0);
        let second = r.request(2, "bay1", "bay1", 0);
        assert_eq!(r.dispatcher.pending_count(), 1);
        match r.dispatcher.check_transport_status(HeatId(2), SimTime(5.0)) {
            TransportStatus::Pending { request, waiting_time, .. } => {
                assert_eq!(request, second);
                assert_eq!(waiting_time, 3.0);
            }
            other => panic!("expected pending, got {other:?}"),
        }
    }

    #[test]
    fn pending_order_is_priority_then_submission() {
        let mut r = rig(one_bay_config());
        r.request(1, "bay1", "bay1", 0); // takes the car
        r.request(2, "bay1", "bay1", 1);
        r.request(3, "bay1", "bay1", 5);
        r.request(4, "bay1", "bay1", 1);
        r.request(5, "bay1", "bay1", -2);
        let order: Vec<_> = r
            .dispatcher
            .pending_requests()
            .iter()
            .map(|req| req.heat_id)
            .collect();
        assert_eq!(order, vec![HeatId(5), HeatId(2), HeatId(4), HeatId(3)]);
    }

    #[test]
    fn blocked_head_stops_the_drain() {
        let mut config = two_bay_config();
        config.fleet.per_type.insert(CarType::Tapping, 1);
        config.fleet.per_type.insert(CarType::Treatment, 1);
        let mut r = rig(config);

        // Occupy the only tapping car, then queue an urgent same-bay move
        // ahead of a servable cross-bay one.
        r.request(1, "bay1", "bay1", 0);
        r.request(2, "bay1", "bay1", -9);
        assert_eq!(r.dispatcher.pending_count(), 1);
        r.request(3, "bay1", "bay2", 0);
        assert_eq!(r.dispatcher.pending_count(), 2);
        let treatment = r
            .dispatcher
            .cars()
            .find(|c| c.car_type() == CarType::Treatment)
            .unwrap();
        assert_eq!(treatment.status(), CarStatus::Idle);
    }

    #[test]
    fn drain_respects_assignment_bound() {
        let mut config = one_bay_config();
        config.fleet.per_type.insert(CarType::Tapping, 3);
        config.dispatch.max_assignments_per_drain = 2;
        let mut r = rig(config);

        // Queue three without draining, then drain once.
        for n in 1..=3 {
            let route = r.route("bay1", "bay1");
            r.dispatcher.next_request += 1;
            let id = RequestId(r.dispatcher.next_request);
            r.dispatcher.pending.push(Pending(TransportRequest {
                id,
                heat: heat(n),
                heat_id: HeatId(n),
                from_station: route.from_station,
                to_station: route.to_station,
                from_bay: route.from_bay,
                to_bay: route.to_bay,
                required_car_type: CarType::Tapping,
                priority: 0,
                submitted_at: SimTime::ZERO,
            }));
        }
        let assigned = r
            .dispatcher
            .process_pending(SimTime::ZERO, &mut r.spatial, &mut r.events);
        assert_eq!(assigned, 2);
        assert_eq!(r.dispatcher.pending_count(), 1);
        assert_eq!(r.dispatcher.pending_requests()[0].heat_id, HeatId(3));
    }

    #[test]
    fn closest_car_wins() {
        let mut config = three_bay_config();
        config.fleet.per_type.insert(CarType::Treatment, 2);
        let mut r = rig(config);
        // Car 1 homes in bay1, car 2 in bay2.
        r.request(1, "bay3", "bay1", 0);
        let busy: Vec<_> = r
            .dispatcher
            .cars()
            .filter(|c| c.status() != CarStatus::Idle)
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(busy, vec!["TreatmentCar_2"]);
    }

    #[test]
    fn unknown_bay_request_stays_pending() {
        let mut r = rig(one_bay_config());
        r.request(1, "bay1", "nowhere", 0);
        // Cross-bay: needs a treatment car, and there is none.
        assert_eq!(r.dispatcher.pending_count(), 1);
        assert_eq!(
            r.events.of_kind(crate::event::EventKind::RequestQueued).count(),
            1
        );
    }

    #[test]
    fn request_crane_returns_first_available() {
        let mut config = one_bay_config();
        config.crane.count_per_bay = 2;
        let r = rig(config);
        let first = r.dispatcher.cranes().in_bay(&bay("bay1"))[0];
        assert_eq!(
            r.dispatcher.request_crane(&bay("bay1"), CraneOperation::Loading),
            Some(first)
        );
        assert_eq!(r.dispatcher.request_crane(&bay("bay9"), CraneOperation::Loading), None);
    }

    #[test]
    fn utilization_is_zero_at_start() {
        let r = rig(two_bay_config());
        assert_eq!(r.dispatcher.utilization(SimTime::ZERO), 0.0);
        assert_eq!(r.dispatcher.crane_metrics(SimTime::ZERO).len(), 2);
        let status = r.dispatcher.status(SimTime::ZERO);
        assert_eq!(status.cars.len(), 3);
        assert_eq!(status.cranes.len(), 2);
        assert_eq!(status.pending_requests, 0);
    }
}
