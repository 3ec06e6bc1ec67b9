//! Rate limiting logic: window math, the two limiters and the decision engine.

mod backend;
mod clock;
mod engine;
mod fixed;
mod key;
mod policy;
mod rules;
mod sliding;
mod verdict;
mod window;

pub use backend::{Counters, WindowLimiter};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use engine::{Decision, EngineOptions, RateLimitEngine};
pub use fixed::FixedWindowLimiter;
pub use key::{BucketKey, ClientKey, Keyspace, DEFAULT_KEY_PREFIX};
pub use policy::{Mode, Policy, MAX_WINDOW_SECS};
pub use rules::{RouteRule, RuleSet, TimeUnit};
pub use sliding::{weighted_count, SlidingWindowLimiter};
pub use verdict::{FixedStatus, SlidingSnapshot, Status, Verdict};
pub use window::WindowId;
