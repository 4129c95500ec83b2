mod checkpoint;
mod game_id;
mod metadata;
mod ranking;
mod rollup;
mod sample;
mod source;

pub use checkpoint::Watermark;
pub use game_id::GameId;
pub use metadata::GameMetadata;
pub use ranking::{Ranking, RankingCriterion, RankingScope};
pub use rollup::{Rollup, RollupKey, RollupUpdateResult};
pub use sample::{NewSample, RawSample};
pub use source::Source;
