//! Cache dependencies
//!
//! A dependency decides whether a cached entry is still valid. On the write
//! path it is evaluated once, capturing a snapshot of its payload (a tag
//! stamp, a query result, a file mtime) that is stored next to the value. On
//! the read path the payload is computed again and compared with the
//! snapshot; any difference turns the read into a miss.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{CacheError, Result};

mod context;
pub mod file;
pub mod tag;

pub use context::{CallbackFn, DependencyContext, DependencyRegistry, QuerySource};

/// The kinds of dependency and the configuration each one needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DependencyKind {
    /// Valid while none of the tags has been invalidated
    Tag { tags: Vec<String> },
    /// A single named group; behaves like a one-tag dependency
    Group { group: String },
    /// Changed when any child changed, or when all did with `require_all`
    Chained {
        children: Vec<Dependency>,
        #[serde(default)]
        require_all: bool,
    },
    /// Changed when the query result differs
    Query {
        source: String,
        sql: String,
        #[serde(default)]
        params: Vec<Value>,
    },
    /// Changed when the named callback returns something different
    Callback {
        name: String,
        #[serde(default)]
        args: Value,
    },
    /// Changed when the file's modification time differs
    File { path: PathBuf },
    /// Changed when any matching file under the directory changed, appeared
    /// or disappeared
    Directory {
        path: PathBuf,
        #[serde(default)]
        max_depth: Option<usize>,
        #[serde(default)]
        name_filter: Option<String>,
    },
}

/// Payload captured when a dependency was evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub payload: Value,
    /// Unix milliseconds at evaluation time
    pub captured_at: i64,
}

/// A dependency and, once evaluated, its snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub kind: DependencyKind,
    /// Memoize the payload per unit of work
    #[serde(default)]
    pub reuse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    snapshot: Option<Snapshot>,
}

impl Dependency {
    pub fn new(kind: DependencyKind) -> Self {
        Self {
            kind,
            reuse: false,
            snapshot: None,
        }
    }

    pub fn tag<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(DependencyKind::Tag {
            tags: tags.into_iter().map(Into::into).collect(),
        })
    }

    pub fn group(group: impl Into<String>) -> Self {
        Self::new(DependencyKind::Group {
            group: group.into(),
        })
    }

    /// Changed when any child changed
    pub fn chained(children: Vec<Dependency>) -> Self {
        Self::new(DependencyKind::Chained {
            children,
            require_all: false,
        })
    }

    /// Changed only when every child changed
    pub fn chained_all(children: Vec<Dependency>) -> Self {
        Self::new(DependencyKind::Chained {
            children,
            require_all: true,
        })
    }

    pub fn query(source: impl Into<String>, sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::new(DependencyKind::Query {
            source: source.into(),
            sql: sql.into(),
            params,
        })
    }

    pub fn callback(name: impl Into<String>, args: Value) -> Self {
        Self::new(DependencyKind::Callback {
            name: name.into(),
            args,
        })
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(DependencyKind::File { path: path.into() })
    }

    pub fn directory(
        path: impl Into<PathBuf>,
        max_depth: Option<usize>,
        name_filter: Option<&str>,
    ) -> Self {
        Self::new(DependencyKind::Directory {
            path: path.into(),
            max_depth,
            name_filter: name_filter.map(str::to_string),
        })
    }

    /// Memoize this dependency's payload within a unit of work
    pub fn reusable(mut self) -> Self {
        self.reuse = true;
        self
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn is_evaluated(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Stable hash of this dependency's own configuration.
    ///
    /// Snapshots and the reuse flag are not part of it, so two dependencies
    /// configured the same way share memoized payloads.
    ///
    /// # Errors
    ///
    /// Fails when the configuration has no JSON form (a non UTF-8 path).
    pub fn reuse_hash(&self) -> Result<String> {
        let canonical = serde_json::to_vec(&self.kind)?;
        Ok(hex::encode(Sha256::digest(canonical)))
    }

    /// Check that every field this kind needs is present
    pub fn validate(&self, ctx: &DependencyContext<'_>) -> Result<()> {
        match &self.kind {
            DependencyKind::Tag { tags } => {
                if tags.is_empty() {
                    return Err(CacheError::configuration("tag.tags", "at least one tag is required"));
                }
                if tags.iter().any(|tag| tag.is_empty()) {
                    return Err(CacheError::configuration("tag.tags", "tags must not be empty"));
                }
            }
            DependencyKind::Group { group } => {
                if group.is_empty() {
                    return Err(CacheError::configuration("group.group", "group name is required"));
                }
            }
            DependencyKind::Chained { children, .. } => {
                if children.is_empty() {
                    return Err(CacheError::configuration(
                        "chained.children",
                        "at least one child dependency is required",
                    ));
                }
                for child in children {
                    child.validate(ctx)?;
                }
            }
            DependencyKind::Query { source, sql, .. } => {
                if source.is_empty() || sql.is_empty() {
                    return Err(CacheError::configuration(
                        "query",
                        "both a source name and a query are required",
                    ));
                }
                ctx.registry().query_source(source)?;
            }
            DependencyKind::Callback { name, .. } => {
                if name.is_empty() {
                    return Err(CacheError::configuration("callback.name", "callback name is required"));
                }
                ctx.registry().callback(name)?;
            }
            DependencyKind::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(CacheError::configuration("file.path", "path is required"));
                }
            }
            DependencyKind::Directory {
                path, name_filter, ..
            } => {
                if path.as_os_str().is_empty() {
                    return Err(CacheError::configuration("directory.path", "path is required"));
                }
                if let Some(pattern) = name_filter {
                    file::name_matcher(pattern)?;
                }
            }
        }
        Ok(())
    }

    /// Capture the current payload as this dependency's snapshot.
    ///
    /// Chained dependencies evaluate every child, even after one fails, so
    /// that side effects such as stamp creation all happen; the first error
    /// is returned afterwards.
    pub fn evaluate(&mut self, ctx: &DependencyContext<'_>) -> Result<()> {
        self.validate(ctx)?;

        let payload = match &mut self.kind {
            DependencyKind::Chained { children, .. } => {
                let mut first_error = None;
                for child in children.iter_mut() {
                    if let Err(e) = child.evaluate(ctx) {
                        first_error.get_or_insert(e);
                    }
                }
                if let Some(e) = first_error {
                    return Err(e);
                }
                Value::Null
            }
            _ => self.payload(ctx)?,
        };

        self.snapshot = Some(Snapshot {
            payload,
            captured_at: Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    /// Whether the payload differs from the captured snapshot.
    ///
    /// An unevaluated dependency has nothing to compare against and always
    /// reports changed.
    pub fn changed(&self, ctx: &DependencyContext<'_>) -> Result<bool> {
        self.validate(ctx)?;

        if let DependencyKind::Chained {
            children,
            require_all,
        } = &self.kind
        {
            return if *require_all {
                for child in children {
                    if !child.changed(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            } else {
                for child in children {
                    if child.changed(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            };
        }

        let Some(snapshot) = &self.snapshot else {
            debug!("Dependency was never evaluated, treating as changed");
            return Ok(true);
        };
        Ok(self.payload(ctx)? != snapshot.payload)
    }

    /// Current payload, memoized in the unit of work when `reuse` is set
    fn payload(&self, ctx: &DependencyContext<'_>) -> Result<Value> {
        match (self.reuse, ctx.unit()) {
            (true, Some(unit)) => unit.get_or_compute(&self.reuse_hash()?, || self.generate(ctx)),
            _ => self.generate(ctx),
        }
    }

    fn generate(&self, ctx: &DependencyContext<'_>) -> Result<Value> {
        match &self.kind {
            DependencyKind::Tag { tags } => tag::current_stamps(ctx.cache(), tag::TAG_MARKER, tags),
            DependencyKind::Group { group } => tag::current_stamps(
                ctx.cache(),
                tag::GROUP_MARKER,
                std::slice::from_ref(group),
            ),
            DependencyKind::Chained { .. } => Ok(Value::Null),
            DependencyKind::Query {
                source,
                sql,
                params,
            } => ctx
                .registry()
                .query_source(source)?
                .query(sql, params)
                .map_err(|e| match e {
                    CacheError::Query { .. } => e,
                    other if other.is_configuration() => other,
                    other => CacheError::query(source, other.to_string()),
                }),
            DependencyKind::Callback { name, args } => {
                let callback = ctx.registry().callback(name)?;
                callback(args).map_err(|e| match e {
                    CacheError::Callback { .. } => e,
                    other if other.is_configuration() => other,
                    other => CacheError::callback(name, other.to_string()),
                })
            }
            DependencyKind::File { path } => file::file_payload(path),
            DependencyKind::Directory {
                path,
                max_depth,
                name_filter,
            } => file::directory_payload(path, *max_depth, name_filter.as_deref()),
        }
    }
}
