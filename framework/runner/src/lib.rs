mod cli;
mod config;
mod context;
mod coordinator;
mod definition;
mod init;
mod monitor;
mod progress;
mod run;
mod scenario;
mod shutdown;
mod stages;
mod transport;
mod types;
mod virtual_user;

pub mod prelude {
    pub use crate::cli::StampedeScenarioCli;
    pub use crate::config::{
        expand_env, CheckConfig, DurationConfig, GroupConfig, ResolvedConfig, RunConfig,
        ScenarioConfig, StageConfig,
    };
    pub use crate::context::RunnerContext;
    pub use crate::coordinator::{CoordinatorOutcome, RunCoordinator, RunSettings, RunState};
    pub use crate::definition::{ScenarioDefinition, ScenarioDefinitionBuilder, TransportFactory};
    pub use crate::init::{init, init_logger};
    pub use crate::run::run;
    pub use crate::scenario::{
        evaluate, Check, CheckFn, CheckOutcome, Method, RequestGroup, Scenario,
    };
    pub use crate::stages::{ScheduleTarget, Stage, StageSchedule};
    pub use crate::transport::{HttpRequest, HttpResponse, Transport};
    pub use crate::types::StampedeResult;
    pub use crate::virtual_user::VirtualUser;

    pub use stampede_core::prelude::*;
    pub use stampede_instruments::{
        CheckKey, CheckSummary, OperationSummary, ReportConfig, Reporter, RunReport,
    };
}
