//! `${...}` macro expansion against a key/value context.
//!
//! # Responsibility
//! - Substitute `${key}` tokens in policy templates, keystore locations and
//!   permission targets.
//! - Offer a single-pass mode and a nested mode where token keys may contain
//!   further tokens (`${app.${mode}.home}`).
//!
//! # Invariants
//! - Expansion is a pure function of `(template, context, strict)`.
//! - On error no partial output is returned.
//! - Resolvable values are followed at most `MAX_RESOLUTION_DEPTH` steps.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

const TOKEN_OPEN: &str = "${";
const TOKEN_CLOSE: char = '}';
const MAX_RESOLUTION_DEPTH: usize = 32;

pub type ExpandResult<T> = Result<T, ExpandError>;

/// Macro expansion failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
    #[error("malformed template `{template}`: unclosed token at byte {offset}")]
    MalformedTemplate { template: String, offset: usize },
    #[error("unresolved key `{0}`")]
    UnresolvedKey(String),
    #[error("resolution of key `{key}` did not terminate within {limit} steps")]
    ResolutionDepthExceeded { key: String, limit: usize },
}

/// A context value that computes its text lazily, possibly through other
/// context entries.
pub trait Resolvable: Send + Sync + Debug {
    fn resolve(&self, context: &MacroContext) -> ExpandResult<MacroValue>;
}

/// One context entry.
#[derive(Debug, Clone)]
pub enum MacroValue {
    Text(String),
    Resolvable(Arc<dyn Resolvable>),
}

impl From<&str> for MacroValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MacroValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Resolves to whatever another key in the same context resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef(pub String);

impl Resolvable for KeyRef {
    fn resolve(&self, context: &MacroContext) -> ExpandResult<MacroValue> {
        context
            .get(self.0.as_str())
            .cloned()
            .ok_or_else(|| ExpandError::UnresolvedKey(self.0.clone()))
    }
}

/// Key/value context consulted during expansion.
#[derive(Debug, Clone, Default)]
pub struct MacroContext {
    values: BTreeMap<String, MacroValue>,
}

impl MacroContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MacroValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn insert_resolvable(&mut self, key: impl Into<String>, value: Arc<dyn Resolvable>) {
        self.values
            .insert(key.into(), MacroValue::Resolvable(value));
    }

    /// Returns a copy of this context with `other` layered on top.
    pub fn merged(&self, other: &MacroContext) -> Self {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&MacroValue> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for MacroContext
where
    K: Into<String>,
    V: Into<MacroValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut context = Self::new();
        for (key, value) in iter {
            context.insert(key, value);
        }
        context
    }
}

/// Expands every `${key}` token in one pass.
///
/// The first `}` after a `${` closes the token, so keys cannot contain
/// nested tokens. A `}` outside any token is literal text.
///
/// # Errors
/// - `MalformedTemplate` when a `${` has no closing `}`.
/// - `UnresolvedKey` when `strict` and a key is absent.
pub fn expand(template: &str, context: &MacroContext, strict: bool) -> ExpandResult<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find(TOKEN_OPEN) {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + TOKEN_OPEN.len()..];
        let Some(end) = after_open.find(TOKEN_CLOSE) else {
            return Err(ExpandError::MalformedTemplate {
                template: template.to_string(),
                offset: offset + start,
            });
        };

        output.push_str(&lookup(&after_open[..end], context, strict)?);

        let consumed = start + TOKEN_OPEN.len() + end + 1;
        rest = &rest[consumed..];
        offset += consumed;
    }

    output.push_str(rest);
    Ok(output)
}

/// Expands tokens whose keys may themselves contain tokens.
///
/// A nesting weight goes up on every `${` and down on every `}`; the key is
/// looked up once the weight returns to zero, after its own tokens have been
/// expanded.
///
/// # Errors
/// Same as [`expand`].
pub fn expand_nested(template: &str, context: &MacroContext, strict: bool) -> ExpandResult<String> {
    let bytes = template.as_bytes();
    let mut output = String::with_capacity(template.len());
    let mut literal_start = 0;
    let mut index = 0;

    while index < bytes.len() {
        if !opens_token(bytes, index) {
            index += 1;
            continue;
        }

        output.push_str(&template[literal_start..index]);
        let key_start = index + TOKEN_OPEN.len();
        let mut weight = 1usize;
        let mut cursor = key_start;
        while cursor < bytes.len() {
            if opens_token(bytes, cursor) {
                weight += 1;
                cursor += TOKEN_OPEN.len();
                continue;
            }
            if bytes[cursor] == b'}' {
                weight -= 1;
                if weight == 0 {
                    break;
                }
            }
            cursor += 1;
        }

        if weight != 0 {
            return Err(ExpandError::MalformedTemplate {
                template: template.to_string(),
                offset: index,
            });
        }

        let key = expand_nested(&template[key_start..cursor], context, strict)?;
        output.push_str(&lookup(&key, context, strict)?);

        index = cursor + 1;
        literal_start = index;
    }

    output.push_str(&template[literal_start..]);
    Ok(output)
}

/// Returns whether `value` contains any `${` token opener.
pub fn has_tokens(value: &str) -> bool {
    value.contains(TOKEN_OPEN)
}

fn opens_token(bytes: &[u8], index: usize) -> bool {
    bytes[index] == b'$' && bytes.get(index + 1) == Some(&b'{')
}

fn lookup(key: &str, context: &MacroContext, strict: bool) -> ExpandResult<String> {
    match context.get(key) {
        Some(value) => resolve_value(key, value.clone(), context),
        None if strict => Err(ExpandError::UnresolvedKey(key.to_string())),
        None => Ok(String::new()),
    }
}

fn resolve_value(key: &str, mut value: MacroValue, context: &MacroContext) -> ExpandResult<String> {
    for _ in 0..MAX_RESOLUTION_DEPTH {
        match value {
            MacroValue::Text(text) => return Ok(text),
            MacroValue::Resolvable(resolvable) => value = resolvable.resolve(context)?,
        }
    }
    Err(ExpandError::ResolutionDepthExceeded {
        key: key.to_string(),
        limit: MAX_RESOLUTION_DEPTH,
    })
}
