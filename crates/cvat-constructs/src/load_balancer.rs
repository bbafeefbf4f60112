//! Application load balancer, listener and path-based routing.
//!
//! Listener rules are kept in a [`RoutingTable`] keyed by priority. The
//! load balancer evaluates rules lowest priority first and the first match
//! wins, regardless of the order the rules were declared in. The table can
//! answer "which rule handles this path" without deploying anything.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};

use cvat_core::{ConstructPath, Expr, Resource, Result, SynthError, Template};

use crate::connections::{Connections, SecurityGroup};
use crate::network::Vpc;

const MAX_PRIORITY: u32 = 50_000;
const HTTP_PORT: u16 = 80;

// ── Target groups ─────────────────────────────────────────────────

/// Health check settings; unset fields keep the provider defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthCheck {
    pub path: Option<String>,
    pub timeout_seconds: Option<u32>,
    pub interval_seconds: Option<u32>,
    pub healthy_threshold: Option<u32>,
    pub unhealthy_threshold: Option<u32>,
}

impl HealthCheck {
    pub(crate) fn properties(&self) -> Vec<(&'static str, Expr)> {
        let mut props = Vec::new();
        if let Some(path) = &self.path {
            props.push(("HealthCheckPath", Expr::str(path)));
        }
        if let Some(v) = self.timeout_seconds {
            props.push(("HealthCheckTimeoutSeconds", Expr::from(v)));
        }
        if let Some(v) = self.interval_seconds {
            props.push(("HealthCheckIntervalSeconds", Expr::from(v)));
        }
        if let Some(v) = self.healthy_threshold {
            props.push(("HealthyThresholdCount", Expr::from(v)));
        }
        if let Some(v) = self.unhealthy_threshold {
            props.push(("UnhealthyThresholdCount", Expr::from(v)));
        }
        props
    }
}

/// A pool of service tasks the load balancer forwards to.
#[derive(Debug, Clone)]
pub struct TargetGroup {
    pub logical_id: String,
    pub port: u16,
    /// The ECS service registered in this group.
    pub service_id: String,
    /// Network side of the registered service.
    pub targets: Connections,
}

impl TargetGroup {
    pub fn arn(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }
}

// ── Routing table ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    Forward {
        /// Logical id of the target group.
        target_group: String,
    },
    FixedResponse {
        status_code: u16,
        content_type: String,
        message_body: String,
    },
}

impl RuleAction {
    fn to_expr(&self) -> Expr {
        match self {
            RuleAction::Forward { target_group } => Expr::map([
                ("TargetGroupArn", Expr::reference(target_group)),
                ("Type", Expr::str("forward")),
            ]),
            RuleAction::FixedResponse {
                status_code,
                content_type,
                message_body,
            } => Expr::map([
                (
                    "FixedResponseConfig",
                    Expr::map([
                        ("ContentType", Expr::str(content_type)),
                        ("MessageBody", Expr::str(message_body)),
                        ("StatusCode", Expr::str(status_code.to_string())),
                    ]),
                ),
                ("Type", Expr::str("fixed-response")),
            ]),
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Forward { target_group } => write!(f, "forward -> {target_group}"),
            RuleAction::FixedResponse {
                status_code,
                message_body,
                ..
            } => write!(f, "fixed-response {status_code} \"{message_body}\""),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerRule {
    /// Construct id of the rule.
    pub id: String,
    pub priority: u32,
    pub path_patterns: Vec<String>,
    pub action: RuleAction,
}

impl ListenerRule {
    pub fn matches(&self, path: &str) -> bool {
        self.path_patterns.iter().any(|p| path_pattern_matches(p, path))
    }
}

/// Result of routing one request path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Route<'a> {
    /// The matching rule, `None` when the default action applies.
    pub rule: Option<&'a ListenerRule>,
    pub action: &'a RuleAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingTable {
    rules: BTreeMap<u32, ListenerRule>,
    default_action: RuleAction,
}

impl RoutingTable {
    pub fn new(default_action: RuleAction) -> Self {
        Self {
            rules: BTreeMap::new(),
            default_action,
        }
    }

    /// Whether `rule` could be added: its priority is within 1..=50000 and
    /// not taken.
    pub fn check(&self, rule: &ListenerRule) -> Result<()> {
        if rule.priority == 0 || rule.priority > MAX_PRIORITY {
            return Err(SynthError::InvalidPriority(rule.priority));
        }
        if let Some(existing) = self.rules.get(&rule.priority) {
            return Err(SynthError::DuplicatePriority {
                priority: rule.priority,
                existing: existing.id.clone(),
            });
        }
        Ok(())
    }

    /// Add a rule. Priorities must be unique and within 1..=50000.
    pub fn add(&mut self, rule: ListenerRule) -> Result<()> {
        self.check(&rule)?;
        self.rules.insert(rule.priority, rule);
        Ok(())
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &ListenerRule> {
        self.rules.values()
    }

    pub fn default_action(&self) -> &RuleAction {
        &self.default_action
    }

    pub fn route(&self, path: &str) -> Route<'_> {
        match self.rules.values().find(|r| r.matches(path)) {
            Some(rule) => Route {
                rule: Some(rule),
                action: &rule.action,
            },
            None => Route {
                rule: None,
                action: &self.default_action,
            },
        }
    }
}

/// ALB path-pattern matching: `*` matches any run of characters, `?`
/// exactly one, everything else literally and case-sensitively.
pub fn path_pattern_matches(pattern: &str, path: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = path.chars().collect();
    let (mut pi, mut si) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;
    while si < s.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = si;
            pi += 1;
        } else if let Some(st) = star {
            pi = st + 1;
            mark += 1;
            si = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

// ── Load balancer ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LoadBalancer {
    pub path: ConstructPath,
    pub logical_id: String,
    pub connections: Connections,
}

impl LoadBalancer {
    /// Internet-facing load balancer in the public subnets, open on port 80.
    pub fn new(template: &mut Template, path: ConstructPath, vpc: &Vpc) -> Result<Self> {
        let security_group = SecurityGroup::new(template, path.child("SecurityGroup"), &vpc.vpc_id)?;
        security_group.allow_from_anywhere(template, HTTP_PORT, "Allow from anyone on port 80")?;
        let logical_id = template.add_resource(
            &path,
            Resource::new("AWS::ElasticLoadBalancingV2::LoadBalancer")
                .prop(
                    "LoadBalancerAttributes",
                    Expr::list([Expr::map([
                        ("Key", Expr::str("deletion_protection.enabled")),
                        ("Value", Expr::str("false")),
                    ])]),
                )
                .prop("Scheme", "internet-facing")
                .prop("SecurityGroups", Expr::list([security_group.group_id()]))
                .prop("Subnets", Expr::List(vpc.public_subnet_ids()))
                .prop("Type", "application"),
        )?;
        Ok(Self {
            path,
            logical_id,
            connections: Connections::new(security_group, Some(Expr::from(HTTP_PORT))),
        })
    }

    pub fn dns_name(&self) -> Expr {
        Expr::att(&self.logical_id, "DNSName")
    }

    /// HTTP listener forwarding unmatched requests to `default_target`.
    pub fn add_listener(
        &self,
        template: &mut Template,
        id: &str,
        port: u16,
        default_target: &TargetGroup,
    ) -> Result<Listener> {
        let default_action = RuleAction::Forward {
            target_group: default_target.logical_id.clone(),
        };
        let path = self.path.child(id);
        let logical_id = template.add_resource(
            &path,
            Resource::new("AWS::ElasticLoadBalancingV2::Listener")
                .prop("DefaultActions", Expr::list([default_action.to_expr()]))
                .prop("LoadBalancerArn", Expr::reference(&self.logical_id))
                .prop("Port", port)
                .prop("Protocol", "HTTP"),
        )?;
        let listener = Listener {
            path,
            logical_id,
            balancer: self.connections.clone(),
            routing: RoutingTable::new(default_action),
        };
        listener.attach(template, default_target, &listener.logical_id)?;
        Ok(listener)
    }
}

#[derive(Debug, Clone)]
pub struct Listener {
    pub path: ConstructPath,
    pub logical_id: String,
    balancer: Connections,
    pub routing: RoutingTable,
}

impl Listener {
    /// Forward requests matching `path_patterns` to a target group.
    pub fn add_target_groups(
        &mut self,
        template: &mut Template,
        id: &str,
        priority: u32,
        path_patterns: &[&str],
        target: &TargetGroup,
    ) -> Result<String> {
        let action = RuleAction::Forward {
            target_group: target.logical_id.clone(),
        };
        let rule_id = self.add_rule(template, id, priority, path_patterns, action)?;
        self.attach(template, target, &rule_id)?;
        Ok(rule_id)
    }

    /// Answer requests matching `path_patterns` with a fixed response.
    pub fn add_fixed_response(
        &mut self,
        template: &mut Template,
        id: &str,
        priority: u32,
        path_patterns: &[&str],
        status_code: u16,
        content_type: &str,
        message_body: &str,
    ) -> Result<String> {
        let action = RuleAction::FixedResponse {
            status_code,
            content_type: content_type.to_string(),
            message_body: message_body.to_string(),
        };
        self.add_rule(template, id, priority, path_patterns, action)
    }

    fn add_rule(
        &mut self,
        template: &mut Template,
        id: &str,
        priority: u32,
        path_patterns: &[&str],
        action: RuleAction,
    ) -> Result<String> {
        let rule = ListenerRule {
            id: id.to_string(),
            priority,
            path_patterns: path_patterns.iter().map(|p| p.to_string()).collect(),
            action,
        };
        let resource = Resource::new("AWS::ElasticLoadBalancingV2::ListenerRule")
            .prop("Actions", Expr::list([rule.action.to_expr()]))
            .prop(
                "Conditions",
                Expr::list([Expr::map([
                    ("Field", Expr::str("path-pattern")),
                    (
                        "PathPatternConfig",
                        Expr::map([("Values", Expr::list(path_patterns.iter().copied()))]),
                    ),
                ])]),
            )
            .prop("ListenerArn", Expr::reference(&self.logical_id))
            .prop("Priority", priority);
        self.routing.check(&rule)?;
        let logical_id = template.add_resource(&self.path.child(format!("{id}Rule")), resource)?;
        self.routing.add(rule)?;
        info!(rule = id, priority, patterns = ?path_patterns, "listener rule added");
        Ok(logical_id)
    }

    /// Let the load balancer reach the target's tasks and make the ECS
    /// service wait for the resource that associates the target group.
    fn attach(&self, template: &mut Template, target: &TargetGroup, via: &str) -> Result<()> {
        let mut targets = target.targets.clone();
        targets.default_port = Some(Expr::from(target.port));
        self.balancer
            .allow_to_default_port(template, &targets, "Load balancer to target")?;
        template
            .resource_mut(&target.service_id)?
            .depends_on
            .insert(via.to_string());
        debug!(target_group = %target.logical_id, via, "target group attached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvat_core::config::NetworkConfig;

    fn forward(tg: &str) -> RuleAction {
        RuleAction::Forward {
            target_group: tg.to_string(),
        }
    }

    fn rule(id: &str, priority: u32, patterns: &[&str], action: RuleAction) -> ListenerRule {
        ListenerRule {
            id: id.to_string(),
            priority,
            path_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            action,
        }
    }

    fn cvat_table() -> RoutingTable {
        let mut table = RoutingTable::new(forward("Ui"));
        // Declared out of priority order on purpose.
        table
            .add(rule("CvatServer1", 20, &["/api/*", "/git/*", "/opencv/*", "/static/*"], forward("Server")))
            .unwrap();
        table
            .add(rule("CvatServer2", 30, &["/admin*", "/documentation/*", "/django-rq*"], forward("Server")))
            .unwrap();
        table
            .add(rule(
                "DisableSelfRegistration",
                1,
                &["/api/auth/register*"],
                RuleAction::FixedResponse {
                    status_code: 403,
                    content_type: "text/plain".into(),
                    message_body: "Self-registration is not allowed".into(),
                },
            ))
            .unwrap();
        table
    }

    #[test]
    fn glob_matching() {
        assert!(path_pattern_matches("/api/*", "/api/tasks"));
        assert!(path_pattern_matches("/admin*", "/admin"));
        assert!(path_pattern_matches("/admin*", "/administration/x"));
        assert!(path_pattern_matches("/a?c", "/abc"));
        assert!(!path_pattern_matches("/a?c", "/ac"));
        assert!(!path_pattern_matches("/api/*", "/API/tasks"));
        assert!(!path_pattern_matches("/api/*", "/api"));
        assert!(path_pattern_matches("*", ""));
    }

    #[test]
    fn self_registration_is_blocked_first() {
        let table = cvat_table();
        let route = table.route("/api/auth/register");
        assert_eq!(route.rule.map(|r| r.priority), Some(1));
        assert!(matches!(route.action, RuleAction::FixedResponse { status_code: 403, .. }));
    }

    #[test]
    fn api_and_admin_go_to_server() {
        let table = cvat_table();
        assert_eq!(table.route("/api/tasks").rule.map(|r| r.priority), Some(20));
        assert_eq!(table.route("/django-rq/queues").rule.map(|r| r.priority), Some(30));
        assert_eq!(table.route("/api/auth/login").action, &forward("Server"));
    }

    #[test]
    fn unmatched_paths_use_default() {
        let table = cvat_table();
        let route = table.route("/tasks/1");
        assert!(route.rule.is_none());
        assert_eq!(route.action, &forward("Ui"));
    }

    #[test]
    fn rules_iterate_by_priority() {
        let priorities: Vec<u32> = cvat_table().rules().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![1, 20, 30]);
    }

    #[test]
    fn duplicate_priority_is_an_error() {
        let mut table = cvat_table();
        let err = table.add(rule("Other", 20, &["/x"], forward("Ui"))).unwrap_err();
        assert!(matches!(err, SynthError::DuplicatePriority { priority: 20, .. }));
    }

    #[test]
    fn priority_range() {
        let mut table = RoutingTable::new(forward("Ui"));
        assert!(matches!(
            table.add(rule("Zero", 0, &["/x"], forward("Ui"))),
            Err(SynthError::InvalidPriority(0))
        ));
        assert!(table.add(rule("Max", 50_000, &["/x"], forward("Ui"))).is_ok());
    }

    fn listener(t: &mut Template) -> Listener {
        let root = ConstructPath::root("T");
        let vpc = Vpc::new(t, root.child("VPC"), &NetworkConfig::default()).unwrap();
        let lb = LoadBalancer::new(t, root.child("LoadBalancer"), &vpc).unwrap();
        Listener {
            path: lb.path.child("Listener"),
            logical_id: "LoadBalancerListener".to_string(),
            balancer: lb.connections.clone(),
            routing: RoutingTable::new(forward("Ui")),
        }
    }

    fn block(listener: &mut Listener, t: &mut Template, id: &str, priority: u32) -> Result<String> {
        listener.add_fixed_response(t, id, priority, &["/blocked*"], 403, "text/plain", "no")
    }

    #[test]
    fn failed_rule_resource_leaves_routing_untouched() {
        let mut t = Template::new();
        let mut listener = listener(&mut t);
        block(&mut listener, &mut t, "Blocked", 1).unwrap();

        let err = block(&mut listener, &mut t, "Blocked", 2).unwrap_err();
        assert!(matches!(err, SynthError::DuplicateLogicalId { .. }));
        let priorities: Vec<u32> = listener.routing.rules().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![1]);
        assert!(listener.routing.route("/blocked/x").rule.is_some());
    }

    #[test]
    fn rejected_priority_adds_no_resource() {
        let mut t = Template::new();
        let mut listener = listener(&mut t);
        block(&mut listener, &mut t, "Blocked", 1).unwrap();
        let before = t.resources().len();

        let err = block(&mut listener, &mut t, "Other", 1).unwrap_err();
        assert!(matches!(err, SynthError::DuplicatePriority { .. }));
        assert!(matches!(
            block(&mut listener, &mut t, "Late", 0),
            Err(SynthError::InvalidPriority(0))
        ));
        assert_eq!(t.resources().len(), before);
        assert_eq!(listener.routing.rules().count(), 1);
    }

    #[test]
    fn fixed_response_renders() {
        let action = RuleAction::FixedResponse {
            status_code: 403,
            content_type: "text/plain".into(),
            message_body: "Self-registration is not allowed".into(),
        };
        let v = action.to_expr().to_json();
        assert_eq!(v["Type"], "fixed-response");
        assert_eq!(v["FixedResponseConfig"]["StatusCode"], "403");
    }
}
