use time::OffsetDateTime;

/// A single gauge reading as delivered by an upstream collaborator.
///
/// `value` is either `None` (missing) or a finite number in the unit of the
/// enclosing table's `Variable`. `query_time` is when the reading was
/// collected from the data service, when that is known.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub site_id: String,
    pub ts: OffsetDateTime,
    pub value: Option<f64>,
    pub quality: i32,
    pub query_time: Option<OffsetDateTime>,
}

impl Observation {
    /// Builds an observation, folding non-finite values (NaN, ±inf) into
    /// `None` so the "missing or finite" invariant holds from the start.
    pub fn new(site_id: impl Into<String>, ts: OffsetDateTime, value: Option<f64>, quality: i32) -> Self {
        Self {
            site_id: site_id.into(),
            ts,
            value: value.filter(|v| v.is_finite()),
            quality,
            query_time: None,
        }
    }

    pub fn with_query_time(mut self, query_time: OffsetDateTime) -> Self {
        self.query_time = Some(query_time);
        self
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }
}
