pub mod message;
pub mod session;
pub mod table;

pub use message::{extract_text, CandidateRow, Message, MessagePayload, SessionIdRow};
pub use session::{group_by_session, Session};
pub use table::{
    AnalyticsConfig, ColumnConfig, ColumnRender, FilterConfig, FilterKind, MatchKind,
    MatchStrategy, PositiveNegative, SelectOption, StatConfig, StatMetric, TableConfig,
};
