//! Steering the engine's fetch order.
//!
//! [`scheduler`] turns focus into piece tiers; [`low_seeder`] widens
//! connection limits for starved swarms.

pub mod low_seeder;
pub mod scheduler;

pub use low_seeder::LowSeederPolicy;
pub use scheduler::{
    PriorityScheduler, ScheduleReport, SessionPlacement, TierPlan, TierWrite, plan_tiers,
    urgent_piece_count,
};
