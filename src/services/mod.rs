// 服务层模块
pub mod delivery_client;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod transport;

pub use delivery_client::DeliveryClient;
pub use retry::{AttemptResult, RetryDecision, RetryPolicy};
pub use scheduler::{CycleOutcome, CycleReport, JobScheduler, SchedulerContext, next_daily_run};
pub use shutdown::shutdown_on_signal;
pub use transport::{HttpTransport, TransportError, TransportResponse, UploadRequest, UploadTransport};
