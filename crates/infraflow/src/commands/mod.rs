pub mod backend;
pub mod firewall_plan;
pub mod reconcile;
pub mod state;
