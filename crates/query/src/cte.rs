//! Common table expressions shared by the composer and the auxiliary resolvers.

use crate::columns::{PeriodColumn, TableName};
use crate::context::QueryContext;

pub const PERIOD_CTE: &str = "period_expanded";
pub const FACILITY_CTE: &str = "facility_subset";
pub const FACILITY_TABLE: &str = "facilities";

/// `period_expanded AS (SELECT *, <derived> FROM "<table>")`.
pub fn period_cte(table: &TableName, columns: &[PeriodColumn]) -> String {
    let derived: Vec<String> =
        columns.iter().map(|c| format!("{} AS {}", c.derive_from_period_id(), c.as_str())).collect();
    format!("{PERIOD_CTE} AS (SELECT *, {} FROM {})", derived.join(", "), table.quoted())
}

/// `facility_subset AS (SELECT facility_id, <enabled columns> FROM facilities)`.
pub fn facility_cte(ctx: &QueryContext) -> String {
    let mut columns = vec!["facility_id"];
    columns.extend(ctx.enabled_facility_columns.iter().map(|c| c.as_str()));
    format!("{FACILITY_CTE} AS (SELECT {} FROM {FACILITY_TABLE})", columns.join(", "))
}

/// The `WITH` prefix the context calls for, or nothing.
pub fn with_clause(ctx: &QueryContext) -> String {
    let mut ctes = Vec::new();
    if ctx.needs_period_cte {
        ctes.push(period_cte(&ctx.table, &ctx.needed_period_columns));
    }
    if ctx.needs_facility_join {
        ctes.push(facility_cte(ctx));
    }
    if ctes.is_empty() { String::new() } else { format!("WITH {} ", ctes.join(", ")) }
}

/// `FROM` target including the facility join when needed.
pub fn from_clause(ctx: &QueryContext) -> String {
    let source = if ctx.needs_period_cte { PERIOD_CTE.to_string() } else { ctx.table.quoted() };
    if ctx.needs_facility_join {
        format!(" FROM {source} b LEFT JOIN {FACILITY_CTE} f ON b.facility_id = f.facility_id")
    } else {
        format!(" FROM {source}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{FacilityColumn, Identifier};

    fn ctx() -> QueryContext {
        QueryContext {
            table: Identifier::new("ro_m1_results").unwrap(),
            has_period_id: true,
            enabled_facility_columns: vec![FacilityColumn::FacilityType, FacilityColumn::FacilityCustom1],
            requested_facility_columns: vec![],
            needs_facility_join: false,
            needed_period_columns: vec![],
            needs_period_cte: false,
            non_facility_filters: vec![],
            facility_filters: vec![],
        }
    }

    #[test]
    fn test_plain_table() {
        let ctx = ctx();
        assert_eq!(with_clause(&ctx), "");
        assert_eq!(from_clause(&ctx), " FROM \"ro_m1_results\"");
    }

    #[test]
    fn test_period_cte_only_derives_needed_columns() {
        let mut ctx = ctx();
        ctx.needs_period_cte = true;
        ctx.needed_period_columns = vec![PeriodColumn::Year];

        let with = with_clause(&ctx);
        assert!(with.starts_with("WITH period_expanded AS (SELECT *, (period_id / 100)::int AS year FROM"));
        assert!(!with.contains("quarter_id"));
        assert_eq!(from_clause(&ctx), " FROM period_expanded");
    }

    #[test]
    fn test_both_ctes_with_join() {
        let mut ctx = ctx();
        ctx.needs_period_cte = true;
        ctx.needed_period_columns = vec![PeriodColumn::Month];
        ctx.needs_facility_join = true;
        ctx.requested_facility_columns = vec![FacilityColumn::FacilityType];

        let with = with_clause(&ctx);
        assert!(with.contains("facility_subset AS (SELECT facility_id, facility_type, facility_custom_1 FROM facilities)"));
        assert_eq!(
            from_clause(&ctx),
            " FROM period_expanded b LEFT JOIN facility_subset f ON b.facility_id = f.facility_id"
        );
    }
}
