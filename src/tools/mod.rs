pub mod echo;
pub mod executor;
pub mod final_answer;
pub mod http;
pub mod registry;
pub mod remote;
pub mod schema;
pub mod stdio;

pub use echo::EchoTool;
pub use executor::{ToolExecutor, ToolOutcome};
pub use final_answer::{FinalAnswerTool, FINAL_ANSWER_TOOL};
pub use http::HttpToolTransport;
pub use registry::{Tool, ToolDescriptor, ToolRegistry};
pub use remote::{discover_tools, RemoteTool, RemoteToolDescriptor, ToolTransport, TransportError};
pub use schema::{parameters_schema, ParamSpec, ParamType, ToolSchema};
pub use stdio::StdioToolTransport;
