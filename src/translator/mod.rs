//! The translator pipeline (§4): predicate lowering, projection
//! minimisation, and the top-level pipeline-operator resolver that ties
//! them together into a [`query::QueryCommandOptions`].

pub mod filter;
pub mod query;
pub mod select;
