pub mod bitquery_query; // Paginated GraphQL batch query (authoritative side)
pub mod bitquery_ws; // graphql-ws subscription (stream side)
pub mod dex_trades;

pub use bitquery_query::{BitqueryQueryClient, RetryPolicy};
pub use bitquery_ws::BitqueryStream;
