//! Building filters from finder configuration.
//!
//! # Responsibilities
//! - Turn a [`RouteTableFind`] tree into a [`RouteFilter`]
//! - Report every broken node in the tree, not just the first

use regex::Regex;
use thiserror::Error;

use crate::config::schema::{FindKind, RouteTableFind};
use crate::routing::cidr::parse_cidr;
use crate::routing::filter::{
    AndFilter, DestinationCidrFilter, MainFilter, NotFilter, OrFilter, RouteFilter, RouteVia,
    SubnetFilter, TagMatch, TagRegexMatch,
};

/// A broken finder node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FindError {
    #[error("by_tag_regexp finder for key '{key}' has an invalid regexp: {reason}")]
    BadRegexp { key: String, reason: String },

    #[error("has_route_to finder cidr '{0}' does not parse")]
    BadCidr(String),

    #[error("{0} finder needs a non-empty '{1}'")]
    Empty(&'static str, &'static str),
}

impl RouteTableFind {
    /// Compile this finder, applying `not` at every level.
    pub fn build_filter(&self) -> Result<Box<dyn RouteFilter>, Vec<FindError>> {
        let filter: Box<dyn RouteFilter> = match &self.kind {
            FindKind::ByTag { key, value } => {
                if key.is_empty() {
                    return Err(vec![FindError::Empty("by_tag", "key")]);
                }
                Box::new(TagMatch::new(key, value))
            }
            FindKind::ByTagRegexp { key, regexp } => match Regex::new(regexp) {
                Ok(re) => Box::new(TagRegexMatch::new(key, re)),
                Err(e) => {
                    return Err(vec![FindError::BadRegexp {
                        key: key.clone(),
                        reason: e.to_string(),
                    }])
                }
            },
            FindKind::And { filters } => Box::new(AndFilter::new(build_all(filters)?)),
            FindKind::Or { filters } => Box::new(OrFilter::new(build_all(filters)?)),
            FindKind::Main => Box::new(MainFilter),
            FindKind::Subnet { subnet_id } => {
                if subnet_id.is_empty() {
                    return Err(vec![FindError::Empty("subnet", "subnet_id")]);
                }
                Box::new(SubnetFilter::new(subnet_id))
            }
            FindKind::HasRouteTo {
                cidr,
                via_igw,
                via_instance,
                instance_not_active,
            } => {
                if parse_cidr(cidr).is_none() {
                    return Err(vec![FindError::BadCidr(cidr.clone())]);
                }
                Box::new(DestinationCidrFilter::new(
                    cidr,
                    RouteVia::from_flags(*via_igw, *via_instance, *instance_not_active),
                ))
            }
        };

        if self.not {
            Ok(Box::new(NotFilter::new(filter)))
        } else {
            Ok(filter)
        }
    }
}

fn build_all(finds: &[RouteTableFind]) -> Result<Vec<Box<dyn RouteFilter>>, Vec<FindError>> {
    let mut filters = Vec::with_capacity(finds.len());
    let mut errors = Vec::new();
    for find in finds {
        match find.build_filter() {
            Ok(f) => filters.push(f),
            Err(mut e) => errors.append(&mut e),
        }
    }
    if errors.is_empty() {
        Ok(filters)
    } else {
        Err(errors)
    }
}
