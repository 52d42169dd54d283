//! Request bodies for the books API.

use crate::error::{HarnessError, HarnessResult};
use crate::fixtures::BookFixture;
use serde::{Deserialize, Serialize};

/// Body sent when creating a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookPayload {
    pub title: String,
    pub authors: String,
    pub publisher: String,
    pub pages: u64,
    pub isbn: String,
}

impl BookPayload {
    /// Project a fixture into a create payload.
    ///
    /// Fails with `InvalidPageCount` if the fixture's page count is not a
    /// non-negative integer.
    pub fn build(fixture: &BookFixture) -> HarnessResult<Self> {
        let pages = fixture
            .pages
            .to_count()
            .ok_or_else(|| HarnessError::InvalidPageCount {
                title: fixture.title.clone(),
                value: fixture.pages.to_string(),
            })?;

        Ok(Self {
            title: fixture.title.clone(),
            authors: fixture.authors.clone(),
            publisher: fixture.publisher.clone(),
            pages,
            isbn: fixture.isbn.clone(),
        })
    }
}

impl TryFrom<&BookFixture> for BookPayload {
    type Error = HarnessError;

    fn try_from(fixture: &BookFixture) -> HarnessResult<Self> {
        Self::build(fixture)
    }
}
