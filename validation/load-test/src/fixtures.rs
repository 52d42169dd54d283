//! Sample book records used to synthesize request payloads.
//!
//! The fixture file is read at most once per process. Every caller, on any
//! thread, observes the same cached sequence afterwards.

use crate::error::{HarnessError, HarnessResult};
use once_cell::sync::OnceCell;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Page count as it appears in the fixture file.
///
/// Fixture data sets are hand-edited and sometimes carry the page count as a
/// string; coercion happens when a payload is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pages {
    Number(serde_json::Number),
    Text(String),
}

impl Pages {
    /// Coerce to a non-negative integer, if possible.
    pub fn to_count(&self) -> Option<u64> {
        match self {
            Pages::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            }),
            Pages::Text(s) => s.trim().parse::<u64>().ok(),
        }
    }
}

impl fmt::Display for Pages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pages::Number(n) => write!(f, "{}", n),
            Pages::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<u64> for Pages {
    fn from(value: u64) -> Self {
        Pages::Number(value.into())
    }
}

/// A single sample record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookFixture {
    pub title: String,
    pub authors: String,
    pub publisher: String,
    pub pages: Pages,
    pub isbn: String,
}

/// On-disk layout of the fixture file.
#[derive(Debug, Deserialize)]
struct FixtureFile {
    books: Vec<BookFixture>,
}

/// Read-only, load-once store of book fixtures.
#[derive(Debug)]
pub struct FixtureStore {
    source: Option<PathBuf>,
    books: OnceCell<Vec<BookFixture>>,
}

impl FixtureStore {
    /// Create a store that reads `path` on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(path.into()),
            books: OnceCell::new(),
        }
    }

    /// Create a store over an in-memory fixture set.
    pub fn from_books(books: Vec<BookFixture>) -> Self {
        Self {
            source: None,
            books: OnceCell::with_value(books),
        }
    }

    /// Path the fixtures are loaded from, if file-backed.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Load the fixture set, reading the file only on the first call.
    pub fn load(&self) -> HarnessResult<&[BookFixture]> {
        self.books
            .get_or_try_init(|| match &self.source {
                Some(path) => read_fixture_file(path),
                None => Ok(Vec::new()),
            })
            .map(Vec::as_slice)
    }

    /// Number of loaded fixtures.
    pub fn len(&self) -> HarnessResult<usize> {
        Ok(self.load()?.len())
    }

    /// Whether the loaded set is empty.
    pub fn is_empty(&self) -> HarnessResult<bool> {
        Ok(self.load()?.is_empty())
    }

    /// Pick one fixture uniformly at random.
    pub fn sample(&self) -> HarnessResult<&BookFixture> {
        self.sample_with(&mut rand::thread_rng())
    }

    /// Pick one fixture uniformly at random using the given RNG.
    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> HarnessResult<&BookFixture> {
        self.load()?
            .choose(rng)
            .ok_or(HarnessError::EmptyFixtureSet)
    }
}

fn read_fixture_file(path: &Path) -> HarnessResult<Vec<BookFixture>> {
    let content = std::fs::read_to_string(path).map_err(|e| HarnessError::FixtureRead {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let file: FixtureFile =
        serde_json::from_str(&content).map_err(|e| HarnessError::FixtureParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    info!(path = %path.display(), count = file.books.len(), "Loaded book fixtures");
    Ok(file.books)
}

#[cfg(test)]
pub(crate) fn sample_book(title: &str, pages: Pages) -> BookFixture {
    BookFixture {
        title: title.to_string(),
        authors: "Martin Fowler".to_string(),
        publisher: "Addison-Wesley Professional".to_string(),
        pages,
        isbn: "9780134757599".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Write;
    use std::sync::Arc;

    fn write_fixture(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_pages_coercion() {
        assert_eq!(Pages::from(320).to_count(), Some(320));
        assert_eq!(Pages::Text(" 448 ".to_string()).to_count(), Some(448));
        assert_eq!(Pages::Text("many".to_string()).to_count(), None);
        assert_eq!(Pages::Text("-5".to_string()).to_count(), None);

        let negative: Pages = serde_json::from_str("-12").unwrap();
        assert_eq!(negative.to_count(), None);
        let integral: Pages = serde_json::from_str("400.0").unwrap();
        assert_eq!(integral.to_count(), Some(400));
        let fractional: Pages = serde_json::from_str("400.5").unwrap();
        assert_eq!(fractional.to_count(), None);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_fixture(
            r#"{"books": [
                {"title": "Refactoring", "authors": "Martin Fowler", "publisher": "Addison-Wesley Professional", "pages": 448, "isbn": "9780134757599"},
                {"title": "Code", "authors": "Charles Petzold", "publisher": "Microsoft Press", "pages": "400", "isbn": "9780735611313"}
            ]}"#,
        );

        let store = FixtureStore::new(file.path());
        let books = store.load().unwrap();
        assert_eq!(books.len(), 2);
        assert_eq!(books[0].title, "Refactoring");
        assert_eq!(books[1].pages, Pages::Text("400".to_string()));
    }

    #[test]
    fn test_load_is_cached() {
        let file = write_fixture(
            r#"{"books": [{"title": "Code", "authors": "Charles Petzold", "publisher": "Microsoft Press", "pages": 400, "isbn": "9780735611313"}]}"#,
        );
        let store = FixtureStore::new(file.path());
        let first = store.load().unwrap().as_ptr();

        // The file is gone; a second read would fail.
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());

        let second = store.load().unwrap().as_ptr();
        assert_eq!(first, second);
    }

    #[test]
    fn test_concurrent_load_observes_single_set() {
        let file = write_fixture(
            r#"{"books": [{"title": "Code", "authors": "Charles Petzold", "publisher": "Microsoft Press", "pages": 400, "isbn": "9780735611313"}]}"#,
        );
        let store = Arc::new(FixtureStore::new(file.path()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.load().unwrap().as_ptr() as usize)
            })
            .collect();
        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_missing_file_is_error() {
        let store = FixtureStore::new("/nonexistent/books.json");
        assert!(matches!(store.load(), Err(HarnessError::FixtureRead { .. })));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let file = write_fixture(r#"{"books": [{"title": "Code"}"#);
        let store = FixtureStore::new(file.path());
        assert!(matches!(store.load(), Err(HarnessError::FixtureParse { .. })));
    }

    #[test]
    fn test_sample_empty_set() {
        let store = FixtureStore::from_books(Vec::new());
        assert!(matches!(store.sample(), Err(HarnessError::EmptyFixtureSet)));
    }

    #[test]
    fn test_sample_only_returns_members() {
        let books: Vec<_> = (0..5)
            .map(|i| sample_book(&format!("Book {}", i), Pages::from(100 + i)))
            .collect();
        let store = FixtureStore::from_books(books.clone());

        for _ in 0..200 {
            let sampled = store.sample().unwrap();
            assert!(books.contains(sampled));
        }
    }

    #[test]
    fn test_sample_is_uniform() {
        let books: Vec<_> = (0..10)
            .map(|i| sample_book(&format!("Book {}", i), Pages::from(i)))
            .collect();
        let store = FixtureStore::from_books(books);
        let loaded = store.load().unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0usize; 10];

        for _ in 0..10_000 {
            let sampled = store.sample_with(&mut rng).unwrap();
            let idx = loaded
                .iter()
                .position(|b| std::ptr::eq(b, sampled))
                .unwrap();
            counts[idx] += 1;
        }

        // Expected 1000 per bucket; the bounds are far outside sampling noise.
        for (idx, count) in counts.iter().enumerate() {
            assert!(
                (800..=1200).contains(count),
                "fixture {} sampled {} times",
                idx,
                count
            );
        }
    }
}
