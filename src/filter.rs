// Query filtering and sorting for indexed tasks

use serde::{Deserialize, Serialize};

/// Which index a filter consults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Tag,
    Project,
    Context,
    Status,
    Priority,
    DueDate,
    StartDate,
    ScheduledDate,
}

/// Comparison operators for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,       // ==
    Ne,       // !=
    Gt,       // >
    Lt,       // <
    Contains, // tag membership
    Before,   // date <
    After,    // date >
    Empty,    // field absent
}

/// Value types a filter compares against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    String(String),
    None,
}

/// How a filter combines with the result of the filters before it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

/// Filter for querying tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub kind: FilterKind,
    pub op: FilterOp,
    pub value: FilterValue,
    #[serde(default)]
    pub conjunction: Conjunction,
}

impl TaskFilter {
    pub fn new(kind: FilterKind, op: FilterOp, value: FilterValue) -> Self {
        Self {
            kind,
            op,
            value,
            conjunction: Conjunction::And,
        }
    }

    pub fn or(mut self) -> Self {
        self.conjunction = Conjunction::Or;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Priority,
    DueDate,
    StartDate,
    ScheduledDate,
    Content,
    Project,
    FilePath,
    Line,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
    pub field: SortField,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortCriterion {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }
}

impl std::fmt::Display for FilterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterValue::String(s) => write!(f, "{}", s),
            FilterValue::Int(i) => write!(f, "{}", i),
            FilterValue::Bool(b) => write!(f, "{}", b),
            FilterValue::None => write!(f, "<none>"),
        }
    }
}

impl std::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterOp::Eq => write!(f, "="),
            FilterOp::Ne => write!(f, "!="),
            FilterOp::Gt => write!(f, ">"),
            FilterOp::Lt => write!(f, "<"),
            FilterOp::Contains => write!(f, "contains"),
            FilterOp::Before => write!(f, "before"),
            FilterOp::After => write!(f, "after"),
            FilterOp::Empty => write!(f, "empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_creation() {
        let filter = TaskFilter::new(FilterKind::Project, FilterOp::Eq, FilterValue::String("work".to_string()));

        assert_eq!(filter.kind, FilterKind::Project);
        assert_eq!(filter.op, FilterOp::Eq);
        assert_eq!(filter.conjunction, Conjunction::And);
        assert_eq!(filter.or().conjunction, Conjunction::Or);
    }

    #[test]
    fn test_filter_op_display() {
        assert_eq!(FilterOp::Eq.to_string(), "=");
        assert_eq!(FilterOp::Ne.to_string(), "!=");
        assert_eq!(FilterOp::Before.to_string(), "before");
    }

    #[test]
    fn test_filter_value_display() {
        assert_eq!(FilterValue::String("test".to_string()).to_string(), "test");
        assert_eq!(FilterValue::Int(42).to_string(), "42");
        assert_eq!(FilterValue::Bool(true).to_string(), "true");
    }

    #[test]
    fn test_filter_deserialize_defaults_to_and() {
        let json = r#"{"kind":"tag","op":"contains","value":"urgent"}"#;
        let filter: TaskFilter = serde_json::from_str(json).unwrap();
        assert_eq!(filter.kind, FilterKind::Tag);
        assert_eq!(filter.value, FilterValue::String("urgent".to_string()));
        assert_eq!(filter.conjunction, Conjunction::And);
    }
}
