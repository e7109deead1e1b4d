//! A typed query translator and object mapper for LDAP directories.
//!
//! This crate is the core of a directory-query engine: an embedded,
//! composable query language (see [`translator::query::QueryBuilder`])
//! compiled to LDAP v3 search requests (RFC 4511/4515), an object/
//! directory mapping layer ([`mapping`]), and a command-execution
//! pipeline ([`command`]) that drives paged retrieval, change tracking,
//! and result materialisation. The raw wire codec and TLS transport are
//! external collaborators, adapted through [`connection::DirectoryConnection`].

pub mod ast;
pub mod attributes;
pub mod change_tracker;
pub mod command;
pub mod connection;
pub mod context;
pub mod controls;
pub mod convert;
pub mod dn;
pub mod error;
pub mod escape;
pub mod logger;
pub mod mapping;
pub mod paging;
pub mod scope;
pub mod translator;

pub use ast::{Expr, Literal, Projection};
pub use context::{ConnectionFactory, DirectoryContext, DirectoryContextOptions, EntryValue, QueryResult, TrackedEntry};
pub use convert::{AttributeValue, ConverterKind};
pub use error::{Error, Result};
pub use mapping::{ClassMap, ClassMapBuilder, DirectoryMapped, PropertyMap, PropertyMapBuilder, ReadOnly};
pub use scope::Scope;
pub use translator::query::{QueryBuilder, QueryCommandOptions};
