pub mod observation_csv_file;
pub mod observation_ndjson_file;
pub mod site_metadata_csv_file;

pub use observation_csv_file::ObservationCsvFileSource;
pub use observation_ndjson_file::ObservationNdjsonFileSource;
pub use site_metadata_csv_file::load_site_metadata;
