//! Pull and push stream abstractions, pipeline stages, and the bridge.

pub mod bridge;
pub mod pull;
pub mod pull_stages;
pub mod push;
pub mod push_stages;

pub use bridge::{bridge, BridgePull, BridgePush};
pub use pull::{from_iter, IterSource, PullPipeline, PullResult, PullSource, Pulled};
pub use pull_stages::{
    BoundedWait, DeadlineWindow, FixedWindow, Prefetch, TimeoutMode, Turnstile,
};
pub use push::{PushPipeline, PushSink, VecSink};
pub use push_stages::{
    CoroutineStage, CoroutineState, FanOut, Filter, FilterHandle, PushCoroutine,
    PushDeadlineWindow, PushFixedWindow, PushTurnstile, Resumed, RoundRobin, Serializer,
};
