//! URL path parser
//!
//! Grammar, below the version segment:
//!
//! ```text
//! path     = "/" set [ "(" key ")" ] *( "/" step ) [ "/$ref" | "/$value" ]
//! step     = navigation [ "(" key ")" ] | property *( "[" n "]" )
//! key      = component *( "," component )
//! component= number | "'" text "'"          ; '' escapes a quote
//! ```

use super::element::{EntityElement, EntitySetElement, PathElement};
use super::resolver::{PropertyResolver, Resolved, Scope};
use super::resource_path::ResourcePath;
use crate::core::error::{RequestError, StaError, StaResult};
use crate::core::version::Version;
use crate::model::{ModelRegistry, PkValue, Property};
use serde_json::Value;
use std::sync::Arc;

fn invalid(path: &str, message: impl Into<String>) -> StaError {
    RequestError::InvalidPath {
        path: path.to_string(),
        message: message.into(),
    }
    .into()
}

fn decode(text: &str) -> Result<String, String> {
    urlencoding::decode(text)
        .map(|d| d.into_owned())
        .map_err(|e| format!("bad encoding in '{text}': {e}"))
}

/// One `/`-separated piece of a path
///
/// `name` keeps its percent-encoding; the resolver decodes it. Key text is
/// decoded here, after the brackets are located.
#[derive(Debug, PartialEq)]
struct Segment {
    name: String,
    key: Option<PkValue>,
    indexes: Vec<usize>,
}

impl Segment {
    fn parse(raw: &str) -> Result<Segment, String> {
        let name_end = raw.find(['(', '[']).unwrap_or(raw.len());
        let name = raw[..name_end].to_string();
        if name.is_empty() {
            return Err(format!("empty segment name in '{raw}'"));
        }

        let mut rest = &raw[name_end..];
        let mut key = None;
        if rest.starts_with('(') {
            let close = find_closing_paren(rest).ok_or_else(|| format!("unclosed key in '{raw}'"))?;
            key = Some(parse_key(&decode(&rest[1..close])?)?);
            rest = &rest[close + 1..];
        }

        let mut indexes = Vec::new();
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped
                .find(']')
                .ok_or_else(|| format!("unclosed index in '{raw}'"))?;
            let index = stripped[..close]
                .trim()
                .parse()
                .map_err(|_| format!("bad array index in '{raw}'"))?;
            indexes.push(index);
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return Err(format!("unexpected '{rest}' in '{raw}'"));
        }
        Ok(Segment { name, key, indexes })
    }
}

/// Position of the `)` closing the `(` at the start of `text`
fn find_closing_paren(text: &str) -> Option<usize> {
    let mut in_quote = false;
    for (i, c) in text.char_indices().skip(1) {
        match c {
            '\'' => in_quote = !in_quote,
            ')' if !in_quote => return Some(i),
            _ => {}
        }
    }
    None
}

/// Split on `/` outside quoted keys, dropping the leading and trailing empties
fn split_segments(path: &str) -> Result<Vec<&str>, String> {
    let mut segments = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '/' if !in_quote => {
                segments.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_quote {
        return Err("unterminated quoted key".to_string());
    }
    segments.push(&path[start..]);
    if segments.first() == Some(&"") {
        segments.remove(0);
    }
    if segments.last() == Some(&"") {
        segments.pop();
    }
    if segments.iter().any(|s| s.is_empty()) {
        return Err("empty path segment".to_string());
    }
    Ok(segments)
}

fn parse_key(text: &str) -> Result<PkValue, String> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    let mut quoted = false;
    let mut in_quote = false;

    let finish = |current: &mut String, quoted: bool| -> Result<Option<Value>, String> {
        let raw = std::mem::take(current);
        if quoted {
            return Ok(Some(Value::String(raw)));
        }
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Ok(Some(Value::from(i)));
        }
        trimmed
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(|n| Some(Value::Number(n)))
            .ok_or_else(|| format!("bad key component '{trimmed}'"))
    };

    while let Some(c) = chars.next() {
        match c {
            '\'' if in_quote => {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    current.push('\'');
                } else {
                    in_quote = false;
                }
            }
            '\'' => {
                if !current.trim().is_empty() {
                    return Err(format!("bad key '{text}'"));
                }
                current.clear();
                in_quote = true;
                quoted = true;
            }
            ',' if !in_quote => {
                components.push(finish(&mut current, quoted)?);
                quoted = false;
            }
            c if in_quote || !quoted => current.push(c),
            c if c.is_whitespace() => {}
            _ => return Err(format!("bad key '{text}'")),
        }
    }
    if in_quote {
        return Err(format!("unterminated key '{text}'"));
    }
    components.push(finish(&mut current, quoted)?);

    Ok(PkValue::composite(components))
}

/// Builds [`ResourcePath`]s from URL text
#[derive(Clone)]
pub struct PathParser {
    resolver: PropertyResolver,
    service_root_url: String,
}

impl PathParser {
    pub fn new(registry: Arc<ModelRegistry>, service_root_url: impl Into<String>) -> Self {
        Self {
            resolver: PropertyResolver::new(registry),
            service_root_url: service_root_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn resolver(&self) -> &PropertyResolver {
        &self.resolver
    }

    /// Parse an absolute or root-relative URL (`http://host/v1.1/Things(1)`,
    /// `/v1.1/Things(1)`); without a version segment `default_version` applies
    pub fn parse_url(&self, url: &str, default_version: Version) -> StaResult<ResourcePath> {
        let rest = url.strip_prefix(&self.service_root_url).unwrap_or(url);
        let trimmed = rest.trim_start_matches('/');
        let (first, remainder) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        match first.parse::<Version>() {
            Ok(version) => self.parse(version, &format!("/{remainder}")),
            Err(_) => self.parse(default_version, &format!("/{trimmed}")),
        }
    }

    /// Parse the part of a URL below the version segment
    ///
    /// `path` is percent-encoded URL text; every name and key is decoded
    /// exactly once.
    pub fn parse(&self, version: Version, path: &str) -> StaResult<ResourcePath> {
        let mut rp = ResourcePath::new(&self.service_root_url, version, path);
        let segments = split_segments(path).map_err(|m| invalid(path, m))?;
        let scope = Scope::root();
        let mut last_property: Option<Property> = None;

        for (pos, raw) in segments.iter().enumerate() {
            let is_last = pos + 1 == segments.len();
            let segment = Segment::parse(raw).map_err(|m| invalid(path, m))?;

            if segment.name == "$ref" || segment.name == "$value" {
                if !is_last || segment.key.is_some() || !segment.indexes.is_empty() {
                    return Err(invalid(path, format!("{} must end the path", segment.name)));
                }
                let last = rp.last_element();
                if segment.name == "$ref" {
                    if !matches!(last, Some(PathElement::Entity(_) | PathElement::EntitySet(_))) {
                        return Err(invalid(path, "$ref must follow an entity or entity set"));
                    }
                    rp.set_ref(true);
                } else {
                    if !matches!(
                        last,
                        Some(
                            PathElement::Property { .. }
                                | PathElement::CustomProperty { .. }
                                | PathElement::ArrayIndex { .. }
                        )
                    ) {
                        return Err(invalid(path, "$value must follow a property"));
                    }
                    rp.set_value(true);
                }
                continue;
            }

            let last_index = rp.len().checked_sub(1);
            match last_index.map(|i| rp.elements()[i].clone()) {
                None => {
                    let plural = decode(&segment.name).map_err(|m| invalid(path, m))?;
                    let entity_type = self
                        .resolver
                        .registry()
                        .entity_type_for_plural(&plural)
                        .ok_or_else(|| invalid(path, format!("no entity set '{plural}'")))?
                        .clone();
                    rp.add_path_element(
                        PathElement::EntitySet(EntitySetElement::new(entity_type.clone())),
                        true,
                        false,
                    )?;
                    if let Some(key) = segment.key.clone() {
                        rp.add_path_element(
                            PathElement::Entity(EntityElement::new(entity_type).with_id(key)),
                            true,
                            true,
                        )?;
                    }
                }
                Some(PathElement::Entity(entity)) => {
                    let parent = rp.len() - 1;
                    let resolved = self
                        .resolver
                        .resolve(entity.entity_type(), &segment.name, None, &scope)
                        .map_err(|e| invalid(path, e.to_string()))?;
                    match resolved {
                        Resolved::Property(Property::NavigationMain(nav)) => {
                            let target = self
                                .resolver
                                .registry()
                                .navigation_target(&nav)
                                .ok_or_else(|| invalid(path, "navigation target missing"))?
                                .clone();
                            if nav.is_to_many() {
                                rp.add_path_element(
                                    PathElement::EntitySet(
                                        EntitySetElement::new(target.clone())
                                            .with_navigation(nav.clone())
                                            .with_parent(parent),
                                    ),
                                    true,
                                    false,
                                )?;
                                if let Some(key) = segment.key.clone() {
                                    rp.add_path_element(
                                        PathElement::Entity(
                                            EntityElement::new(target)
                                                .with_navigation(nav)
                                                .with_id(key)
                                                .with_parent(parent),
                                        ),
                                        true,
                                        true,
                                    )?;
                                }
                            } else {
                                if segment.key.is_some() {
                                    return Err(invalid(
                                        path,
                                        format!("{} points to a single entity", nav.name()),
                                    ));
                                }
                                rp.add_path_element(
                                    PathElement::Entity(
                                        EntityElement::new(target)
                                            .with_navigation(nav)
                                            .with_parent(parent),
                                    ),
                                    true,
                                    true,
                                )?;
                            }
                            last_property = None;
                        }
                        Resolved::Property(Property::EntityMain(prop)) => {
                            if segment.key.is_some() {
                                return Err(invalid(path, "properties take no key"));
                            }
                            rp.add_path_element(
                                PathElement::property(prop.clone(), parent),
                                false,
                                false,
                            )?;
                            last_property = Some(prop.into());
                        }
                        other => {
                            return Err(invalid(path, format!("unexpected segment {other:?}")));
                        }
                    }
                }
                Some(PathElement::EntitySet(_)) => {
                    return Err(invalid(
                        path,
                        format!("expected a key before '{}'", segment.name),
                    ));
                }
                Some(_) => {
                    if segment.key.is_some() {
                        return Err(invalid(path, "properties take no key"));
                    }
                    let parent = rp.len() - 1;
                    let entity_type = rp
                        .main_entity_type()
                        .ok_or_else(|| invalid(path, "property without entity"))?
                        .clone();
                    let resolved = self
                        .resolver
                        .resolve(&entity_type, &segment.name, last_property.as_ref(), &scope)
                        .map_err(|e| invalid(path, e.to_string()))?
                        .into_property()
                        .ok_or_else(|| invalid(path, "variables are not allowed in paths"))?;
                    rp.add_path_element(
                        PathElement::custom_property(resolved.name(), parent),
                        false,
                        false,
                    )?;
                    last_property = Some(resolved);
                }
            }

            for index in segment.indexes {
                let parent = rp.len() - 1;
                if !matches!(
                    rp.elements()[parent],
                    PathElement::Property { .. }
                        | PathElement::CustomProperty { .. }
                        | PathElement::ArrayIndex { .. }
                ) {
                    return Err(invalid(path, "array index must follow a property"));
                }
                rp.add_path_element(PathElement::array_index(index, parent), false, false)?;
            }
        }

        tracing::trace!(path, elements = rp.len(), "parsed resource path");
        Ok(rp)
    }
}
