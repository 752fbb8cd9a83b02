//! Integration tests module loader

mod integration {
    pub mod cli;
    pub mod http_retry;
    pub mod orchestrator_run;
    pub mod stub_server;
}

mod unit {
    pub mod pool_limiter;
    pub mod stage_progress;
}
