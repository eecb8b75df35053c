//! A short melt-shop shift: two bays, a furnace, a ladle furnace and a
//! caster, and a handful of heats moving between them.
//!
//! Run with: `RUST_LOG=info cargo run -p meltshop-transport --example shift`

use meltshop_core::config::{BayConfig, CarType, PlantConfig};
use meltshop_core::geometry::Position;
use meltshop_core::id::{BayId, HeatId, LadleId};
use meltshop_core::sim::SimTime;
use meltshop_core::station::{Heat, Ladle, Station, StationError};
use meltshop_transport::{EventKind, Plant, TransportEvent};
use tracing_subscriber::EnvFilter;

/// Liquid steel cooling at a fixed rate while in transit.
#[derive(Debug)]
struct MoltenHeat {
    id: HeatId,
    temperature: f64,
    last_update: SimTime,
}

impl MoltenHeat {
    fn tapped(id: u64, at: SimTime) -> Box<dyn Heat> {
        Box::new(Self {
            id: HeatId(id),
            temperature: 1650.0,
            last_update: at,
        })
    }
}

impl Heat for MoltenHeat {
    fn id(&self) -> HeatId {
        self.id
    }

    fn update_temperature(&mut self, now: SimTime) {
        self.temperature -= 1.5 * now.since(self.last_update);
        self.last_update = now;
    }
}

/// A process unit that keeps what it is given.
struct Unit {
    name: String,
    bay: BayId,
    ladle: Option<Ladle>,
    heats: Vec<Box<dyn Heat>>,
}

impl Unit {
    fn new(name: &str, bay: &str, ladle: Option<u32>) -> Box<Self> {
        Box::new(Self {
            name: name.to_string(),
            bay: BayId::new(bay),
            ladle: ladle.map(|n| Ladle::new(LadleId(n), None)),
            heats: Vec::new(),
        })
    }
}

impl Station for Unit {
    fn name(&self) -> &str {
        &self.name
    }

    fn bay(&self) -> &BayId {
        &self.bay
    }

    fn current_ladle(&self) -> Option<&Ladle> {
        self.ladle.as_ref()
    }

    fn take_ladle(&mut self) -> Result<Option<Ladle>, StationError> {
        Ok(self.ladle.take())
    }

    fn add_ladle(&mut self, ladle: Ladle) -> Result<bool, StationError> {
        if self.ladle.is_some() {
            return Ok(false);
        }
        self.ladle = Some(ladle);
        Ok(true)
    }

    fn add_heat(&mut self, heat: Box<dyn Heat>) -> bool {
        self.heats.push(heat);
        true
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut config = PlantConfig::with_bays(vec![
        BayConfig::new("melt", 0.0, 0.0, 300.0, 150.0).with_crane_path(20.0, 75.0),
        BayConfig::new("cast", 300.0, 0.0, 300.0, 150.0).with_crane_path(320.0, 75.0),
    ]);
    config.fleet.per_type.insert(CarType::Tapping, 1);
    config.fleet.per_type.insert(CarType::Treatment, 2);
    config.fleet.per_type.insert(CarType::Rh, 1);

    let mut plant = Plant::new(config)?;
    let eaf = plant.add_station(Unit::new("EAF_1", "melt", Some(1)), Position::new(60.0, 40.0))?;
    let lmf = plant.add_station(Unit::new("LMF_1", "melt", None), Position::new(240.0, 110.0))?;
    let caster = plant.add_station(Unit::new("Caster_1", "cast", None), Position::new(520.0, 75.0))?;

    println!("=== Shift start ===\n");
    for n in 1..=4u64 {
        let heat = MoltenHeat::tapped(n, plant.now());
        let (from, to) = if n % 2 == 1 { (eaf, lmf) } else { (lmf, caster) };
        plant.request_transport(heat, from, to, (n % 3) as i32)?;
        plant.run_for(15.0);
    }
    plant.run_until(SimTime(480.0));

    let status = plant.status();
    println!("t = {}  pending = {}", status.now, status.pending_requests);
    for car in &status.cars {
        println!(
            "  {:<16} {:<10} bay {:<5} heat {:?}",
            car.name,
            car.status.as_str(),
            car.bay.as_str(),
            car.heat
        );
    }
    for m in plant.crane_metrics() {
        println!(
            "  {:<16} util {:>5.1}%  tasks {}  errors {}  avg move {:.2}",
            m.name,
            m.utilization * 100.0,
            m.tasks_completed,
            m.errors,
            m.avg_moving
        );
    }

    let delivered = plant
        .events()
        .of_kind(EventKind::HeatDelivered)
        .filter_map(|e| match e {
            TransportEvent::HeatDelivered { heat, at, .. } => Some(format!("{heat} @ {at}")),
            _ => None,
        })
        .collect::<Vec<_>>();
    println!("\ndelivered: {}", delivered.join(", "));
    println!("state hash: {:016x}", plant.state_hash());
    Ok(())
}
