pub mod flow;
pub mod template;

pub use flow::FlowResolver;
pub use template::PreparedFlow;
