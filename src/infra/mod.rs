pub mod clock;
pub mod http_client;
pub mod jsonl_output_adapter;

pub use clock::SystemClock;
pub use http_client::ReqwestHttp;
pub use jsonl_output_adapter::JsonlOutputAdapter;
