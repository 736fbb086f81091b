use tracing::info;

use crate::error::FetchError;
use crate::source::{ApiClient, Timeframe};

/// Symbols and timeframes offered by the backend, fetched once per owner
#[derive(Debug, Clone, Default)]
pub struct SymbolCatalog {
    symbols: Vec<String>,
    timeframes: Vec<Timeframe>,
    loaded: bool,
}

impl SymbolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an already-loaded catalog from known lists
    pub fn from_parts(symbols: Vec<String>, timeframes: Vec<Timeframe>) -> Self {
        let mut catalog = Self::default();
        catalog.fill(symbols, timeframes);
        catalog
    }

    /// Fetch symbols and timeframes unless already loaded
    ///
    /// A failed load leaves the catalog empty so the next call retries.
    pub async fn ensure_loaded(&mut self, api: &ApiClient) -> Result<(), FetchError> {
        if self.loaded {
            return Ok(());
        }

        let symbols = api.symbols(None).await?;
        let timeframes = api.timeframes().await?;
        info!(
            symbols = symbols.len(),
            timeframes = timeframes.len(),
            "symbol catalog loaded"
        );
        self.fill(symbols, timeframes);
        Ok(())
    }

    fn fill(&mut self, mut symbols: Vec<String>, timeframes: Vec<Timeframe>) {
        symbols.sort();
        symbols.dedup();
        self.symbols = symbols;
        self.timeframes = timeframes;
        self.loaded = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    /// Case-insensitive substring search; prefix matches sort first
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query = query.trim().to_uppercase();
        if query.is_empty() {
            return self.symbols.iter().map(String::as_str).collect();
        }

        let mut matches: Vec<&str> = self
            .symbols
            .iter()
            .map(String::as_str)
            .filter(|symbol| symbol.to_uppercase().contains(&query))
            .collect();
        matches.sort_by_key(|symbol| !symbol.to_uppercase().starts_with(&query));
        matches
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols
            .iter()
            .any(|known| known.eq_ignore_ascii_case(symbol.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> SymbolCatalog {
        let symbols = ["ETHUSDT", "BTCUSDT", "ETHBTC", "SOLUSDT", "BTCUSDT"]
            .into_iter()
            .map(String::from)
            .collect();
        let timeframes = vec![Timeframe {
            interval: "1h".to_string(),
            label: "1 hour".to_string(),
        }];
        SymbolCatalog::from_parts(symbols, timeframes)
    }

    #[test]
    fn test_search() {
        struct TestCase {
            query: &'static str,
            expected: Vec<&'static str>,
        }

        let catalog = catalog();

        let tests = vec![
            TestCase {
                // TC0: empty query lists everything, deduplicated and sorted
                query: "  ",
                expected: vec!["BTCUSDT", "ETHBTC", "ETHUSDT", "SOLUSDT"],
            },
            TestCase {
                // TC1: case insensitive, prefix matches first
                query: "btc",
                expected: vec!["BTCUSDT", "ETHBTC"],
            },
            TestCase {
                // TC2: no match
                query: "doge",
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(catalog.search(test.query), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_contains() {
        let catalog = catalog();
        assert!(catalog.is_loaded());
        assert!(catalog.contains("solusdt"));
        assert!(!catalog.contains("DOGEUSDT"));
        assert_eq!(catalog.timeframes().len(), 1);
        assert!(!SymbolCatalog::new().is_loaded());
    }
}
