pub mod engine;
pub mod states;

pub use engine::{
    check_resubmit, round_remark, FlowDefinition, FlowEngine, SequentialFlow, REMARK_TIME_FORMAT,
};
pub use states::{
    ApproverAction, FlowContext, FlowEvent, PlannedTransition, TransitionOutcome,
};
