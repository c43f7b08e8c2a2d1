pub mod azure;
pub mod offline;
pub mod openai;

pub use azure::AzureClient;
pub use offline::OfflineClient;
pub use openai::OpenAiClient;
