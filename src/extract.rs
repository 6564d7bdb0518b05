//! Row extraction strategies.
//!
//! Extraction is use-case specific and injected at writer construction
//! rather than supplied through a type hierarchy: each concrete source
//! (CDC stream, log format, ...) becomes one strategy value plugged into
//! the same writer type.

use std::sync::Arc;

use crate::error::ExtractionError;
use crate::schema::TableSchemaIdentity;

/// One extracted row together with the table it belongs to.
pub type ExtractedRow<R> = (Arc<TableSchemaIdentity>, R);

/// Turns an input element into an ordered sequence of (identity, row)
/// pairs.
///
/// One element may fan out to several tables, or to none. Extraction
/// failure is fatal to the write call that triggered it.
pub trait RowExtractor<In, R>: Send {
    /// Extract the rows carried by an element.
    fn extract(&mut self, element: &In) -> Result<Vec<ExtractedRow<R>>, ExtractionError>;
}

impl<In, R, F> RowExtractor<In, R> for F
where
    F: FnMut(&In) -> Result<Vec<ExtractedRow<R>>, ExtractionError> + Send,
{
    fn extract(&mut self, element: &In) -> Result<Vec<ExtractedRow<R>>, ExtractionError> {
        self(element)
    }
}
