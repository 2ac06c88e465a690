pub mod executor;
pub mod kernel;
pub mod monitor;
pub mod planner;

pub use executor::ExecutorAgent;
pub use kernel::AgentKernel;
pub use monitor::MonitorAgent;
pub use planner::{PlannerAgent, PlanningResult};
