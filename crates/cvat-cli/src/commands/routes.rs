use cvat_constructs::load_balancer::RoutingTable;

use super::StackArgs;

pub fn routes(args: &StackArgs, path: Option<&str>) -> anyhow::Result<()> {
    let synthesis = args.synthesize()?;
    match path {
        Some(path) => println!("{}", describe_route(&synthesis.routing, path)),
        None => print!("{}", format_table(&synthesis.routing)),
    }
    Ok(())
}

/// One line per rule in evaluation order, then the default action.
pub fn format_table(table: &RoutingTable) -> String {
    let mut out = format!("{:>8}  {:<44}  {}\n", "PRIORITY", "PATHS", "ACTION");
    for rule in table.rules() {
        out.push_str(&format!(
            "{:>8}  {:<44}  {}\n",
            rule.priority,
            rule.path_patterns.join(" "),
            rule.action
        ));
    }
    out.push_str(&format!("{:>8}  {:<44}  {}\n", "default", "*", table.default_action()));
    out
}

pub fn describe_route(table: &RoutingTable, path: &str) -> String {
    let route = table.route(path);
    match route.rule {
        Some(rule) => format!("{path}: {} (rule {}, priority {})", route.action, rule.id, rule.priority),
        None => format!("{path}: {} (default)", route.action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{test_args, test_workspace};

    fn table() -> RoutingTable {
        let dir = test_workspace();
        test_args(dir.path().join("cvat.toml")).synthesize().unwrap().routing
    }

    #[test]
    fn table_lists_rules_by_priority() {
        let text = format_table(&table());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].contains("/api/auth/register*"));
        assert!(lines[1].contains("fixed-response 403"));
        assert!(lines[2].contains("/api/*"));
        assert!(lines[4].starts_with(" default"));
    }

    #[test]
    fn describes_matching_rule() {
        let table = table();
        assert!(describe_route(&table, "/api/auth/register").contains("priority 1"));
        assert!(describe_route(&table, "/api/tasks").contains("priority 20"));
        assert!(describe_route(&table, "/admin/").contains("priority 30"));
        assert!(describe_route(&table, "/tasks/1").ends_with("(default)"));
    }
}
