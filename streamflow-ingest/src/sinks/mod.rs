pub mod artifact;
pub mod obs_seq;
pub mod parallel;
pub mod table;
pub mod time_slice;

pub use artifact::WrittenArtifact;
pub use obs_seq::{MissingPolicy, ObsSeqOptions, ObsSeqWriter};
pub use parallel::{BatchReport, ParallelSliceWriter, SliceWriter};
pub use table::{IngestReport, TableSink};
pub use time_slice::TimeSliceWriter;
