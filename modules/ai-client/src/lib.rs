pub mod deepseek;
pub mod traits;
pub mod util;

pub use deepseek::DeepSeekClient;
pub use traits::{CompletionClient, CompletionRequest, Message, MessageRole};
