/// Errors that prevent the interposition layer from starting
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to resolve real symbol {symbol}: {detail}")]
    SymbolNotFound { symbol: String, detail: String },

    #[error("failed to load {library}: {detail}")]
    LibraryLoad { library: String, detail: String },
}
