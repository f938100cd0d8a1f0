//! Route table filters.
//!
//! # Responsibilities
//! - Select route tables by tag, tag regex, association, or contained route
//! - Combine filters with AND / OR / NOT
//! - Pick the effective route table for a subnet
//!
//! # Design Decisions
//! - Tag matching is case-sensitive on both key and value
//! - Empty AND keeps everything, empty OR keeps nothing
//! - Filters are pure: no I/O, no state

use regex::Regex;

use crate::routing::table::{RouteState, RouteTable};

/// Gateway id prefix identifying an internet gateway.
pub const IGW_PREFIX: &str = "igw-";

/// Trait for selecting route tables.
pub trait RouteFilter: Send + Sync + std::fmt::Debug {
    /// Returns true if the route table should be kept.
    fn keep(&self, table: &RouteTable) -> bool;
}

/// Keeps tables matched by every inner filter.
#[derive(Debug, Default)]
pub struct AndFilter {
    filters: Vec<Box<dyn RouteFilter>>,
}

impl AndFilter {
    pub fn new(filters: Vec<Box<dyn RouteFilter>>) -> Self {
        Self { filters }
    }
}

impl RouteFilter for AndFilter {
    fn keep(&self, table: &RouteTable) -> bool {
        self.filters.iter().all(|f| f.keep(table))
    }
}

/// Keeps tables matched by any inner filter.
#[derive(Debug, Default)]
pub struct OrFilter {
    filters: Vec<Box<dyn RouteFilter>>,
}

impl OrFilter {
    pub fn new(filters: Vec<Box<dyn RouteFilter>>) -> Self {
        Self { filters }
    }
}

impl RouteFilter for OrFilter {
    fn keep(&self, table: &RouteTable) -> bool {
        self.filters.iter().any(|f| f.keep(table))
    }
}

/// Inverts a filter.
#[derive(Debug)]
pub struct NotFilter {
    inner: Box<dyn RouteFilter>,
}

impl NotFilter {
    pub fn new(inner: Box<dyn RouteFilter>) -> Self {
        Self { inner }
    }
}

impl RouteFilter for NotFilter {
    fn keep(&self, table: &RouteTable) -> bool {
        !self.inner.keep(table)
    }
}

/// Exact tag key and value.
#[derive(Debug, Clone)]
pub struct TagMatch {
    key: String,
    value: String,
}

impl TagMatch {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl RouteFilter for TagMatch {
    fn keep(&self, table: &RouteTable) -> bool {
        table
            .tags
            .iter()
            .any(|t| t.key == self.key && t.value == self.value)
    }
}

/// Exact tag key, value matched by a regex.
#[derive(Debug, Clone)]
pub struct TagRegexMatch {
    key: String,
    regex: Regex,
}

impl TagRegexMatch {
    pub fn new(key: impl Into<String>, regex: Regex) -> Self {
        Self {
            key: key.into(),
            regex,
        }
    }
}

impl RouteFilter for TagRegexMatch {
    fn keep(&self, table: &RouteTable) -> bool {
        table
            .tags
            .iter()
            .any(|t| t.key == self.key && self.regex.is_match(&t.value))
    }
}

/// Tables explicitly associated with a subnet.
#[derive(Debug, Clone)]
pub struct SubnetFilter {
    subnet_id: String,
}

impl SubnetFilter {
    pub fn new(subnet_id: impl Into<String>) -> Self {
        Self {
            subnet_id: subnet_id.into(),
        }
    }
}

impl RouteFilter for SubnetFilter {
    fn keep(&self, table: &RouteTable) -> bool {
        table
            .associations
            .iter()
            .any(|a| a.subnet_id.as_deref() == Some(self.subnet_id.as_str()))
    }
}

/// Tables carrying a main association.
#[derive(Debug, Clone, Copy, Default)]
pub struct MainFilter;

impl RouteFilter for MainFilter {
    fn keep(&self, table: &RouteTable) -> bool {
        table.associations.iter().any(|a| a.main)
    }
}

/// Which route targets count for [`DestinationCidrFilter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RouteVia {
    /// Any target.
    #[default]
    Any,
    /// An internet gateway.
    Gateway,
    /// An instance.
    Instance,
    /// An instance whose route is not active.
    InstanceNotActive,
}

impl RouteVia {
    /// Collapse the config flags; gateway wins over instance.
    pub fn from_flags(via_igw: bool, via_instance: bool, instance_not_active: bool) -> Self {
        match (via_igw, via_instance, instance_not_active) {
            (true, _, _) => RouteVia::Gateway,
            (false, true, true) => RouteVia::InstanceNotActive,
            (false, true, false) => RouteVia::Instance,
            (false, false, _) => RouteVia::Any,
        }
    }
}

/// Tables holding a route for a destination CIDR.
#[derive(Debug, Clone)]
pub struct DestinationCidrFilter {
    cidr: String,
    via: RouteVia,
}

impl DestinationCidrFilter {
    pub fn new(cidr: impl Into<String>, via: RouteVia) -> Self {
        Self {
            cidr: cidr.into(),
            via,
        }
    }
}

impl RouteFilter for DestinationCidrFilter {
    fn keep(&self, table: &RouteTable) -> bool {
        table
            .routes
            .iter()
            .filter(|r| r.destination_cidr == self.cidr)
            .any(|r| match self.via {
                RouteVia::Any => true,
                RouteVia::Gateway => r.gateway_id().is_some_and(|g| g.starts_with(IGW_PREFIX)),
                RouteVia::Instance => r.instance_id().is_some(),
                RouteVia::InstanceNotActive => {
                    r.instance_id().is_some() && r.state != RouteState::Active
                }
            })
    }
}

/// Tables kept by `filter`, in input order.
pub fn filter_route_tables(filter: &dyn RouteFilter, tables: &[RouteTable]) -> Vec<RouteTable> {
    tables.iter().filter(|t| filter.keep(t)).cloned().collect()
}

/// The table a subnet actually uses: its explicit association, else the main table.
pub fn route_table_for_subnet<'a>(subnet_id: &str, tables: &'a [RouteTable]) -> Option<&'a RouteTable> {
    let explicit = SubnetFilter::new(subnet_id);
    tables
        .iter()
        .find(|t| explicit.keep(t))
        .or_else(|| tables.iter().find(|t| MainFilter.keep(t)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::table::{Association, Route};

    fn tagged(id: &str, key: &str, value: &str) -> RouteTable {
        RouteTable::new(id, "vpc-1").with_tag(key, value)
    }

    #[derive(Debug)]
    struct Always(bool);

    impl RouteFilter for Always {
        fn keep(&self, _: &RouteTable) -> bool {
            self.0
        }
    }

    #[test]
    fn test_combinator_identities() {
        let table = RouteTable::new("rtb-1", "vpc-1");
        assert!(AndFilter::new(vec![]).keep(&table));
        assert!(!OrFilter::new(vec![]).keep(&table));

        for value in [true, false] {
            let not = NotFilter::new(Box::new(Always(value)));
            assert_eq!(not.keep(&table), !value);
        }

        let and = AndFilter::new(vec![Box::new(Always(true)), Box::new(Always(false))]);
        let or = OrFilter::new(vec![Box::new(Always(false)), Box::new(Always(true))]);
        assert!(!and.keep(&table));
        assert!(or.keep(&table));
    }

    #[test]
    fn test_tag_match_is_case_sensitive() {
        let table = tagged("rtb-1", "Name", "private-a");
        assert!(TagMatch::new("Name", "private-a").keep(&table));
        assert!(!TagMatch::new("name", "private-a").keep(&table));
        assert!(!TagMatch::new("Name", "PRIVATE-A").keep(&table));
    }

    #[test]
    fn test_tag_regex_match() {
        let table = tagged("rtb-1", "Name", "private-a");
        let filter = TagRegexMatch::new("Name", Regex::new("^private-").unwrap());
        assert!(filter.keep(&table));
        let wrong_key = TagRegexMatch::new("Role", Regex::new(".*").unwrap());
        assert!(!wrong_key.keep(&table));
    }

    #[test]
    fn test_subnet_and_main() {
        let t1 = RouteTable::new("rtb-1", "vpc-1").with_association(Association::subnet("subnet-1"));
        let t2 = RouteTable::new("rtb-2", "vpc-1").with_association(Association::main());
        assert!(SubnetFilter::new("subnet-1").keep(&t1));
        assert!(!SubnetFilter::new("subnet-1").keep(&t2));
        assert!(MainFilter.keep(&t2));
        assert!(!MainFilter.keep(&t1));
    }

    #[test]
    fn test_route_table_for_subnet() {
        let t1 = RouteTable::new("rtb-1", "vpc-1").with_association(Association::subnet("subnet-1"));
        let t2 = RouteTable::new("rtb-2", "vpc-1").with_association(Association::main());
        let tables = vec![t2.clone(), t1.clone()];

        assert_eq!(route_table_for_subnet("subnet-1", &tables).map(|t| t.id.as_str()), Some("rtb-1"));
        assert_eq!(route_table_for_subnet("subnet-9", &tables).map(|t| t.id.as_str()), Some("rtb-2"));
        assert!(route_table_for_subnet("subnet-9", &[t1]).is_none());
    }

    #[test]
    fn test_destination_cidr_via() {
        let table = RouteTable::new("rtb-1", "vpc-1")
            .with_route(Route::via_gateway("0.0.0.0/0", "igw-1234"))
            .with_route(Route::via_gateway("10.1.0.0/16", "vgw-1234"))
            .with_route(Route::via_instance("10.2.0.0/16", "i-1", "eni-1"))
            .with_route(
                Route::via_instance("10.3.0.0/16", "i-2", "eni-2").with_state(RouteState::Blackhole),
            );

        let f = |cidr: &str, via| DestinationCidrFilter::new(cidr, via).keep(&table);

        assert!(f("0.0.0.0/0", RouteVia::Any));
        assert!(!f("192.168.0.0/16", RouteVia::Any));
        assert!(f("0.0.0.0/0", RouteVia::Gateway));
        assert!(!f("10.1.0.0/16", RouteVia::Gateway));
        assert!(!f("0.0.0.0/0", RouteVia::Instance));
        assert!(f("10.2.0.0/16", RouteVia::Instance));
        assert!(!f("10.2.0.0/16", RouteVia::InstanceNotActive));
        assert!(f("10.3.0.0/16", RouteVia::InstanceNotActive));
    }

    #[test]
    fn test_route_via_precedence() {
        assert_eq!(RouteVia::from_flags(true, true, true), RouteVia::Gateway);
        assert_eq!(RouteVia::from_flags(false, true, true), RouteVia::InstanceNotActive);
        assert_eq!(RouteVia::from_flags(false, true, false), RouteVia::Instance);
        assert_eq!(RouteVia::from_flags(false, false, true), RouteVia::Any);
    }

    #[test]
    fn test_filter_route_tables_keeps_order() {
        let tables = vec![
            tagged("rtb-1", "Env", "prod"),
            tagged("rtb-2", "Env", "dev"),
            tagged("rtb-3", "Env", "prod"),
        ];
        let kept = filter_route_tables(&TagMatch::new("Env", "prod"), &tables);
        let ids: Vec<&str> = kept.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["rtb-1", "rtb-3"]);
    }
}
