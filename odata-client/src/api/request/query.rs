//! System query options
//!
//! Filter, order and search expressions are passed through as opaque
//! strings; only their encoding is handled here.

use serde::{Deserialize, Serialize};

use crate::api::constants::ODataVersion;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub filter: Option<String>,
    pub select: Vec<String>,
    pub expand: Vec<String>,
    pub order_by: Vec<String>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    /// Ask for the total count alongside the results
    pub count: bool,
    pub search: Option<String>,
    pub skip_token: Option<String>,
    pub delta_token: Option<String>,
    /// Service-specific options, written after the system options
    pub custom: Vec<(String, String)>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, expression: impl Into<String>) -> Self {
        self.filter = Some(expression.into());
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn expand<I, S>(mut self, navigations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expand.extend(navigations.into_iter().map(Into::into));
        self
    }

    pub fn order_by(mut self, expression: impl Into<String>) -> Self {
        self.order_by.push(expression.into());
        self
    }

    pub fn top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn search(mut self, expression: impl Into<String>) -> Self {
        self.search = Some(expression.into());
        self
    }

    pub fn skip_token(mut self, token: impl Into<String>) -> Self {
        self.skip_token = Some(token.into());
        self
    }

    pub fn delta_token(mut self, token: impl Into<String>) -> Self {
        self.delta_token = Some(token.into());
        self
    }

    pub fn custom(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.push((name.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Encoded `name=value` pairs without the leading `?`
    pub fn to_query_string(&self, version: ODataVersion) -> String {
        let mut params: Vec<String> = Vec::new();
        let mut push = |name: &str, value: &str| {
            params.push(format!("{}={}", name, urlencoding::encode(value)));
        };

        if let Some(filter) = &self.filter {
            push("$filter", filter);
        }
        if !self.select.is_empty() {
            push("$select", &self.select.join(","));
        }
        if !self.expand.is_empty() {
            push("$expand", &self.expand.join(","));
        }
        if !self.order_by.is_empty() {
            push("$orderby", &self.order_by.join(","));
        }
        if let Some(top) = self.top {
            push("$top", &top.to_string());
        }
        if let Some(skip) = self.skip {
            push("$skip", &skip.to_string());
        }
        if self.count {
            match version {
                ODataVersion::V4 => push("$count", "true"),
                ODataVersion::V3 => push("$inlinecount", "allpages"),
            }
        }
        if let Some(search) = &self.search {
            push("$search", search);
        }
        if let Some(token) = &self.skip_token {
            push("$skiptoken", token);
        }
        if let Some(token) = &self.delta_token {
            push("$deltatoken", token);
        }
        for (name, value) in &self.custom {
            push(name, value);
        }
        params.join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_encoding() {
        let query = QueryOptions::new()
            .filter("Name eq 'Ann O''Neil'")
            .select(["Name", "Balance"])
            .expand(["Orders"])
            .top(10);
        assert_eq!(
            query.to_query_string(ODataVersion::V4),
            "$filter=Name%20eq%20%27Ann%20O%27%27Neil%27&$select=Name%2CBalance&$expand=Orders&$top=10"
        );
    }

    #[test]
    fn test_count_option_per_version() {
        let query = QueryOptions::new().with_count();
        assert_eq!(query.to_query_string(ODataVersion::V4), "$count=true");
        assert_eq!(query.to_query_string(ODataVersion::V3), "$inlinecount=allpages");
    }

    #[test]
    fn test_empty_query() {
        assert!(QueryOptions::new().is_empty());
        assert_eq!(QueryOptions::new().to_query_string(ODataVersion::V4), "");
        assert!(!QueryOptions::new().skip(5).is_empty());
    }
}
