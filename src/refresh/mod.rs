mod queue;

pub use queue::{Continuation, RefreshQueue};
