pub mod line_protocol;
pub mod senders;

pub use line_protocol::{build_line, build_lines_multi, join_lines, Fields, GroupedFields, KeyValues, Tags};
pub use senders::{ConsoleSender, HttpMetricsSender, MetricsSender, SendStatus, UnconfiguredSender};
