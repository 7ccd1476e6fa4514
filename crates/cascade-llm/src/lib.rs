pub mod http;
pub mod sse;

pub mod mock;

pub use http::ChatCompletionsGenerator;
pub use mock::{MockGenerator, MockReply};
