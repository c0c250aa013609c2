//! Resource paths
//!
//! A [`ResourcePath`] owns its elements in URL order. Parent links are
//! indices into that sequence, so compression builds a new owned sequence
//! instead of splicing shared nodes.

use super::element::PathElement;
use crate::core::error::{RequestError, StaResult};
use crate::core::version::Version;
use crate::model::EntityType;
use std::sync::Arc;

/// Parsed, typed form of a request URL
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePath {
    service_root_url: String,
    version: Version,
    path: String,
    elements: Vec<PathElement>,
    main: Option<usize>,
    identified: Option<usize>,
    is_ref: bool,
    is_value: bool,
    is_entity_property: bool,
}

impl ResourcePath {
    pub fn new(service_root_url: impl Into<String>, version: Version, path: impl Into<String>) -> Self {
        Self {
            service_root_url: service_root_url.into().trim_end_matches('/').to_string(),
            version,
            path: path.into(),
            elements: Vec::new(),
            main: None,
            identified: None,
            is_ref: false,
            is_value: false,
            is_entity_property: false,
        }
    }

    /// Append an element and return its index
    ///
    /// `is_main` marks an entity or entity set as the request target;
    /// `is_identifying` marks a keyed entity as the identified element.
    pub fn add_path_element(
        &mut self,
        element: PathElement,
        is_main: bool,
        is_identifying: bool,
    ) -> StaResult<usize> {
        if let Some(parent) = element.parent() {
            if parent >= self.elements.len() {
                return Err(self.invalid(format!("parent index {parent} out of range")));
            }
            if matches!(element, PathElement::EntitySet(_)) {
                self.check_set_parent(parent)?;
            }
        }

        let index = self.elements.len();
        match &element {
            PathElement::Entity(entity) => {
                if is_main {
                    self.main = Some(index);
                }
                if is_identifying && entity.id().is_some() {
                    self.identified = Some(index);
                }
            }
            PathElement::EntitySet(_) => {
                if is_main {
                    self.main = Some(index);
                }
            }
            PathElement::Property { .. } => self.is_entity_property = true,
            PathElement::CustomProperty { .. } | PathElement::ArrayIndex { .. } => {}
        }
        self.elements.push(element);
        Ok(index)
    }

    /// Re-point the parent of an element; entity sets only accept entities
    pub fn set_parent(&mut self, index: usize, parent: Option<usize>) -> StaResult<()> {
        if index >= self.elements.len() {
            return Err(self.invalid(format!("no element at {index}")));
        }
        if let Some(p) = parent {
            if p >= self.elements.len() {
                return Err(self.invalid(format!("parent index {p} out of range")));
            }
            if matches!(self.elements[index], PathElement::EntitySet(_)) {
                self.check_set_parent(p)?;
            }
        }
        *self.elements[index].parent_mut() = parent;
        Ok(())
    }

    fn check_set_parent(&self, parent: usize) -> StaResult<()> {
        match self.elements.get(parent) {
            Some(PathElement::Entity(_)) => Ok(()),
            _ => Err(self.invalid("the parent of an entity set must be an entity")),
        }
    }

    fn invalid(&self, message: impl Into<String>) -> crate::core::error::StaError {
        RequestError::InvalidPath {
            path: self.path.clone(),
            message: message.into(),
        }
        .into()
    }

    /// Drop everything before the identified entity nearest the end that
    /// directly follows its entity set
    pub fn compress(&mut self) {
        let Some(cut) = (1..self.elements.len()).rev().find(|&i| {
            self.elements[i].is_identified_entity()
                && matches!(self.elements[i - 1], PathElement::EntitySet(_))
        }) else {
            return;
        };

        let shift = |idx: Option<usize>| idx.filter(|&i| i >= cut).map(|i| i - cut);
        let elements: Vec<PathElement> = self
            .elements
            .drain(cut..)
            .map(|mut element| {
                let parent = element.parent_mut();
                *parent = shift(*parent);
                element
            })
            .collect();
        self.elements = elements;
        if let Some(head) = self.elements.first_mut() {
            *head.parent_mut() = None;
        }
        self.main = shift(self.main);
        self.identified = Some(shift(self.identified).unwrap_or(0));
        tracing::trace!(path = %self.path, removed = cut, "compressed resource path");
    }

    /// The first `len` elements as a path of their own, without suffixes
    pub fn truncated(&self, len: usize) -> ResourcePath {
        let mut path = ResourcePath::new(self.service_root_url.clone(), self.version, self.path.clone());
        path.elements = self.elements.iter().take(len).cloned().collect();
        path.main = (0..path.elements.len())
            .rev()
            .find(|&i| path.elements[i].entity_type().is_some());
        path.identified = (0..path.elements.len())
            .rev()
            .find(|&i| path.elements[i].is_identified_entity());
        path.is_entity_property = path
            .elements
            .iter()
            .any(|e| matches!(e, PathElement::Property { .. }));
        path
    }

    /// Canonical absolute URL of this path
    pub fn get_full_url(&self) -> String {
        format!("{}{}", self.service_root_url, self.full_path())
    }

    /// URL path below the service root: `/v1.1/Things(1)/Datastreams`
    pub fn full_path(&self) -> String {
        let mut url = format!("/{}", self.version);
        for (i, element) in self.elements.iter().enumerate() {
            match element {
                PathElement::Entity(entity) => {
                    let follows_set = i > 0
                        && matches!(self.elements[i - 1], PathElement::EntitySet(_))
                        && entity.id().is_some();
                    if !follows_set {
                        url.push('/');
                        if i == 0 && entity.id().is_some() {
                            url.push_str(entity.entity_type().plural());
                        } else {
                            url.push_str(&element.segment_name());
                        }
                    }
                    if let Some(id) = entity.id() {
                        url.push('(');
                        url.push_str(&id.to_url_string());
                        url.push(')');
                    }
                }
                PathElement::ArrayIndex { .. } => url.push_str(&element.segment_name()),
                PathElement::CustomProperty { name, .. } => {
                    url.push('/');
                    url.push_str(&urlencoding::encode(name));
                }
                _ => {
                    url.push('/');
                    url.push_str(&element.segment_name());
                }
            }
        }
        if self.is_ref {
            url.push_str("/$ref");
        } else if self.is_value {
            url.push_str("/$value");
        }
        url
    }

    pub fn service_root_url(&self) -> &str {
        &self.service_root_url
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Path text as received
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn element(&self, index: usize) -> Option<&PathElement> {
        self.elements.get(index)
    }

    pub fn element_mut(&mut self, index: usize) -> Option<&mut PathElement> {
        self.elements.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn last_element(&self) -> Option<&PathElement> {
        self.elements.last()
    }

    pub fn parent_of(&self, index: usize) -> Option<&PathElement> {
        self.elements
            .get(index)
            .and_then(PathElement::parent)
            .and_then(|p| self.elements.get(p))
    }

    pub fn main_index(&self) -> Option<usize> {
        self.main
    }

    pub fn main_element(&self) -> Option<&PathElement> {
        self.main.and_then(|i| self.elements.get(i))
    }

    /// Entity type of the main element
    pub fn main_entity_type(&self) -> Option<&Arc<EntityType>> {
        self.main_element().and_then(PathElement::entity_type)
    }

    pub fn identified_index(&self) -> Option<usize> {
        self.identified
    }

    pub fn identified_element(&self) -> Option<&PathElement> {
        self.identified.and_then(|i| self.elements.get(i))
    }

    pub fn is_ref(&self) -> bool {
        self.is_ref
    }

    pub fn set_ref(&mut self, is_ref: bool) {
        self.is_ref = is_ref;
    }

    pub fn is_value(&self) -> bool {
        self.is_value
    }

    pub fn set_value(&mut self, is_value: bool) {
        self.is_value = is_value;
    }

    /// Path ends in a fixed entity property (possibly followed by custom steps)
    pub fn is_entity_property(&self) -> bool {
        self.is_entity_property
    }
}
