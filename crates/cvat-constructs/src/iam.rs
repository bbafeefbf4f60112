//! IAM roles and policies for ECS tasks.

use cvat_core::{ConstructPath, Expr, Resource, Result, Template};

const POLICY_VERSION: &str = "2012-10-17";

/// One `Allow` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<Expr>,
}

impl PolicyStatement {
    pub fn allow<I, S>(actions: I, resources: Vec<Expr>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            resources,
        }
    }

    pub fn to_expr(&self) -> Expr {
        let action = match self.actions.as_slice() {
            [single] => Expr::str(single),
            many => Expr::list(many.iter()),
        };
        let resource = match self.resources.as_slice() {
            [single] => single.clone(),
            many => Expr::List(many.to_vec()),
        };
        Expr::map([
            ("Action", action),
            ("Effect", Expr::str("Allow")),
            ("Resource", resource),
        ])
    }
}

fn policy_document(statements: &[PolicyStatement]) -> Expr {
    Expr::map([
        ("Statement", Expr::List(statements.iter().map(PolicyStatement::to_expr).collect())),
        ("Version", Expr::str(POLICY_VERSION)),
    ])
}

/// A role assumable by one AWS service principal.
#[derive(Debug, Clone)]
pub struct Role {
    pub path: ConstructPath,
    pub logical_id: String,
    /// Logical id of the default policy, created on first statement.
    pub default_policy: Option<String>,
    statements: Vec<PolicyStatement>,
}

impl Role {
    pub fn new(template: &mut Template, path: ConstructPath, service_principal: &str) -> Result<Self> {
        let trust = Expr::map([
            (
                "Statement",
                Expr::list([Expr::map([
                    ("Action", Expr::str("sts:AssumeRole")),
                    ("Effect", Expr::str("Allow")),
                    ("Principal", Expr::map([("Service", Expr::str(service_principal))])),
                ])]),
            ),
            ("Version", Expr::str(POLICY_VERSION)),
        ]);
        let logical_id = template.add_resource(
            &path,
            Resource::new("AWS::IAM::Role").prop("AssumeRolePolicyDocument", trust),
        )?;
        Ok(Self {
            path,
            logical_id,
            default_policy: None,
            statements: Vec::new(),
        })
    }

    pub fn arn(&self) -> Expr {
        Expr::att(&self.logical_id, "Arn")
    }

    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    /// Add a statement to the role's default policy. A statement equal to
    /// one already present is skipped.
    pub fn add_to_policy(&mut self, template: &mut Template, statement: PolicyStatement) -> Result<()> {
        if self.statements.contains(&statement) {
            return Ok(());
        }
        self.statements.push(statement);
        let document = policy_document(&self.statements);
        match &self.default_policy {
            Some(id) => {
                template
                    .resource_mut(id)?
                    .properties
                    .insert("PolicyDocument".to_string(), document);
            }
            None => {
                let path = self.path.child("DefaultPolicy");
                let id = template.add_resource(
                    &path,
                    Resource::new("AWS::IAM::Policy")
                        .prop("PolicyDocument", document)
                        .prop("PolicyName", path.logical_id())
                        .prop("Roles", Expr::list([Expr::reference(&self.logical_id)])),
                )?;
                self.default_policy = Some(id);
            }
        }
        Ok(())
    }

    /// Attach a separately named inline policy.
    pub fn attach_inline_policy(
        &self,
        template: &mut Template,
        path: ConstructPath,
        statements: &[PolicyStatement],
    ) -> Result<String> {
        let name = path.logical_id();
        template.add_resource(
            &path,
            Resource::new("AWS::IAM::Policy")
                .prop("PolicyDocument", policy_document(statements))
                .prop("PolicyName", name)
                .prop("Roles", Expr::list([Expr::reference(&self.logical_id)])),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_created_once() {
        let mut t = Template::new();
        let root = ConstructPath::root("T");
        let mut role = Role::new(&mut t, root.child("Svc").child("ExecutionRole"), "ecs-tasks.amazonaws.com").unwrap();
        let read = PolicyStatement::allow(["secretsmanager:GetSecretValue"], vec![Expr::reference("DbSecret")]);
        role.add_to_policy(&mut t, read.clone()).unwrap();
        role.add_to_policy(&mut t, read).unwrap();
        role.add_to_policy(
            &mut t,
            PolicyStatement::allow(["logs:CreateLogStream", "logs:PutLogEvents"], vec![Expr::att("Logs", "Arn")]),
        )
        .unwrap();

        assert_eq!(t.resources_of_type("AWS::IAM::Policy").count(), 1);
        let policy = t.resource(role.default_policy.as_deref().unwrap()).unwrap();
        let statements = policy.property("PolicyDocument.Statement").and_then(Expr::as_list).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            policy.property("PolicyDocument.Statement.0.Action").and_then(Expr::as_str),
            Some("secretsmanager:GetSecretValue")
        );
    }

    #[test]
    fn trust_policy_names_principal() {
        let mut t = Template::new();
        let role = Role::new(&mut t, ConstructPath::root("T").child("Role"), "ecs-tasks.amazonaws.com").unwrap();
        let r = t.resource(&role.logical_id).unwrap();
        assert_eq!(
            r.property("AssumeRolePolicyDocument.Statement.0.Principal.Service")
                .and_then(Expr::as_str),
            Some("ecs-tasks.amazonaws.com")
        );
    }
}
