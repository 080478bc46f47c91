pub mod observation;
pub mod site;
pub mod table;
pub mod units;

pub use observation::Observation;
pub use site::{Location, SiteMetadata};
pub use table::{DerivedColumn, ErrorStatistic, ObservationTable, TableError};
pub use units::{ObservationKind, Unit, UnitError, Variable, CFS_TO_CMS, FT_TO_M};
