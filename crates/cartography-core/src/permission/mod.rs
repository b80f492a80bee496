//! Simplified IAM policy evaluation.
//!
//! Derives `(principal)-[:CAN_*]->(resource)` relationships from the policy
//! statements already stored in the graph. Follows the AWS evaluation order in
//! reduced form:
//!
//! 1. An explicit Deny for any requested permission wins immediately, in any
//!    policy attached to the principal.
//! 2. Otherwise an Allow for any requested permission grants access.
//! 3. Otherwise access is denied by default.
//!
//! Conditions, permission boundaries, SCPs and resource policies are not
//! considered.

pub mod clause;
pub mod mapping;
pub mod model;

pub use clause::{evaluate_clause, Clause};
pub use mapping::{
    default_relationship_mappings, parse_permission_relationship_file, RelationshipMapping,
};
pub use model::{
    Effect, Policies, PolicyDecision, PolicyStatement, PrincipalMapping, Principals,
};

/// Check a clause list against a value.
///
/// Returns `missing` when the statement does not carry the clause at all.
fn clause_list_matches(clauses: Option<&[Clause]>, value: &str, missing: bool) -> bool {
    match clauses {
        None => missing,
        Some(list) => list.iter().any(|c| evaluate_clause(c, value)),
    }
}

/// Check whether one statement covers `permission` on `resource_arn`.
///
/// A missing `action` covers every action not excluded by `notaction`. A
/// missing `resource` only covers resources when `notresource` is present.
pub fn statement_matches(statement: &PolicyStatement, permission: &str, resource_arn: &str) -> bool {
    if clause_list_matches(statement.notaction.as_deref(), permission, false) {
        return false;
    }
    if !clause_list_matches(statement.action.as_deref(), permission, true) {
        return false;
    }

    let resource_hit = match (&statement.resource, &statement.notresource) {
        (Some(resources), _) => clause_list_matches(Some(resources.as_slice()), resource_arn, false),
        // A NotResource-only statement covers everything it does not exclude,
        // as AWS evaluates it. Older evaluators treated it as never matching.
        (None, Some(_)) => true,
        (None, None) => false,
    };

    resource_hit && !clause_list_matches(statement.notresource.as_deref(), resource_arn, false)
}

/// Check whether any of `statements` covers `permission` on `resource_arn`.
pub fn evaluate_statements_for_permission<'a, I>(
    statements: I,
    permission: &str,
    resource_arn: &str,
) -> bool
where
    I: IntoIterator<Item = &'a PolicyStatement>,
{
    statements
        .into_iter()
        .any(|s| statement_matches(s, permission, resource_arn))
}

/// Evaluate one policy for a set of permissions on a resource.
pub fn evaluate_policy_for_permission<S: AsRef<str>>(
    statements: &[PolicyStatement],
    permissions: &[S],
    resource_arn: &str,
) -> PolicyDecision {
    let (allow, deny): (Vec<&PolicyStatement>, Vec<&PolicyStatement>) = statements
        .iter()
        .partition(|s| s.effect == Effect::Allow);

    let denied = permissions.iter().any(|p| {
        evaluate_statements_for_permission(deny.iter().copied(), p.as_ref(), resource_arn)
    });
    if denied {
        return PolicyDecision::ExplicitDeny;
    }

    let allowed = permissions.iter().any(|p| {
        evaluate_statements_for_permission(allow.iter().copied(), p.as_ref(), resource_arn)
    });
    if allowed {
        PolicyDecision::Allowed
    } else {
        PolicyDecision::NotAllowed
    }
}

/// Evaluate every policy of a principal against a resource.
pub fn evaluate_policies_against_resource<S: AsRef<str>>(
    policies: &Policies,
    resource_arn: &str,
    permissions: &[S],
) -> bool {
    let mut granted = false;

    for statements in policies.values() {
        match evaluate_policy_for_permission(statements, permissions, resource_arn) {
            PolicyDecision::ExplicitDeny => return false,
            PolicyDecision::Allowed => granted = true,
            PolicyDecision::NotAllowed => {}
        }
    }

    granted
}

/// Compute which principals hold any of `permissions` on each resource.
///
/// Mappings are ordered by resource, then by principal ARN.
pub fn calculate_permission_relationships<S: AsRef<str>>(
    principals: &Principals,
    resource_arns: &[String],
    permissions: &[S],
) -> Vec<PrincipalMapping> {
    let mut mappings = Vec::new();

    for resource_arn in resource_arns {
        for (principal_arn, policies) in principals {
            if evaluate_policies_against_resource(policies, resource_arn, permissions) {
                mappings.push(PrincipalMapping {
                    principal_arn: principal_arn.clone(),
                    resource_arn: resource_arn.clone(),
                });
            }
        }
    }

    mappings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BUCKET: &str = "arn:aws:s3:::test_bucket";
    const OTHER_BUCKET: &str = "arn:aws:s3:::other_bucket";

    fn stmt(value: serde_json::Value) -> PolicyStatement {
        PolicyStatement::from_properties(value).unwrap()
    }

    fn allow_all_s3() -> PolicyStatement {
        stmt(json!({"effect": "Allow", "action": ["s3:*"], "resource": ["*"]}))
    }

    fn policies(entries: Vec<(&str, Vec<PolicyStatement>)>) -> Policies {
        entries
            .into_iter()
            .map(|(id, statements)| (id.to_string(), statements))
            .collect()
    }

    #[test]
    fn test_action_and_resource_match() {
        let s = stmt(json!({"effect": "Allow", "action": "s3:GetObject", "resource": BUCKET}));
        assert!(statement_matches(&s, "s3:getobject", BUCKET));
        assert!(!statement_matches(&s, "s3:PutObject", BUCKET));
        assert!(!statement_matches(&s, "s3:GetObject", OTHER_BUCKET));
    }

    #[test]
    fn test_missing_action_matches_everything() {
        let s = stmt(json!({"effect": "Allow", "resource": ["*"]}));
        assert!(statement_matches(&s, "ec2:RunInstances", BUCKET));
    }

    #[test]
    fn test_notaction_excludes() {
        let s = stmt(json!({"effect": "Allow", "notaction": ["s3:PutObject"], "resource": ["*"]}));
        assert!(statement_matches(&s, "s3:GetObject", BUCKET));
        assert!(!statement_matches(&s, "s3:PutObject", BUCKET));
    }

    #[test]
    fn test_deny_notaction_denies_other_actions() {
        let policy = vec![
            allow_all_s3(),
            stmt(json!({"effect": "Deny", "notaction": ["iam:*"], "resource": ["*"]})),
        ];
        assert_eq!(
            evaluate_policy_for_permission(&policy, &["s3:GetObject"], BUCKET),
            PolicyDecision::ExplicitDeny
        );
        assert_eq!(
            evaluate_policy_for_permission(&policy, &["iam:ListRoles"], BUCKET),
            PolicyDecision::NotAllowed
        );
    }

    #[test]
    fn test_notresource_excludes() {
        let s = stmt(json!({"effect": "Allow", "action": ["s3:*"], "notresource": [BUCKET]}));
        assert!(!statement_matches(&s, "s3:GetObject", BUCKET));
        assert!(statement_matches(&s, "s3:GetObject", OTHER_BUCKET));

        let s = stmt(json!({
            "effect": "Allow",
            "action": ["s3:*"],
            "resource": ["arn:aws:s3:::*"],
            "notresource": [OTHER_BUCKET],
        }));
        assert!(statement_matches(&s, "s3:GetObject", BUCKET));
        assert!(!statement_matches(&s, "s3:GetObject", OTHER_BUCKET));
    }

    #[test]
    fn test_statement_without_resource_clauses_never_matches() {
        let s = stmt(json!({"effect": "Allow", "action": ["s3:*"]}));
        assert!(!statement_matches(&s, "s3:GetObject", BUCKET));
    }

    #[test]
    fn test_policy_allow() {
        let decision = evaluate_policy_for_permission(&[allow_all_s3()], &["s3:GetObject"], BUCKET);
        assert_eq!(decision, PolicyDecision::Allowed);
    }

    #[test]
    fn test_policy_not_allowed() {
        let decision =
            evaluate_policy_for_permission(&[allow_all_s3()], &["dynamodb:Query"], BUCKET);
        assert_eq!(decision, PolicyDecision::NotAllowed);

        let empty: Vec<PolicyStatement> = Vec::new();
        assert_eq!(
            evaluate_policy_for_permission(&empty, &["s3:GetObject"], BUCKET),
            PolicyDecision::NotAllowed
        );
    }

    #[test]
    fn test_policy_explicit_deny_beats_allow() {
        let statements = vec![
            allow_all_s3(),
            stmt(json!({"effect": "Deny", "action": ["s3:GetObject"], "resource": [BUCKET]})),
        ];
        assert_eq!(
            evaluate_policy_for_permission(&statements, &["s3:GetObject"], BUCKET),
            PolicyDecision::ExplicitDeny
        );
        // The deny is scoped to one bucket.
        assert_eq!(
            evaluate_policy_for_permission(&statements, &["s3:GetObject"], OTHER_BUCKET),
            PolicyDecision::Allowed
        );
    }

    #[test]
    fn test_policy_deny_on_any_requested_permission() {
        let statements = vec![
            allow_all_s3(),
            stmt(json!({"effect": "Deny", "action": ["s3:PutObject"], "resource": ["*"]})),
        ];
        assert_eq!(
            evaluate_policy_for_permission(&statements, &["s3:GetObject", "s3:PutObject"], BUCKET),
            PolicyDecision::ExplicitDeny
        );
    }

    #[test]
    fn test_deny_in_one_policy_overrides_other_policies() {
        let p = policies(vec![
            ("allow", vec![allow_all_s3()]),
            (
                "deny",
                vec![stmt(json!({"effect": "Deny", "action": ["s3:*"], "resource": [BUCKET]}))],
            ),
        ]);
        assert!(!evaluate_policies_against_resource(&p, BUCKET, &["s3:GetObject"]));
        assert!(evaluate_policies_against_resource(&p, OTHER_BUCKET, &["s3:GetObject"]));
    }

    #[test]
    fn test_default_deny() {
        let p = policies(vec![(
            "ec2",
            vec![stmt(json!({"effect": "Allow", "action": ["ec2:*"], "resource": ["*"]}))],
        )]);
        assert!(!evaluate_policies_against_resource(&p, BUCKET, &["s3:GetObject"]));
        assert!(!evaluate_policies_against_resource(&Policies::new(), BUCKET, &["s3:GetObject"]));
    }

    #[test]
    fn test_any_permission_is_enough() {
        let p = policies(vec![(
            "query",
            vec![stmt(json!({"effect": "Allow", "action": ["dynamodb:Query"], "resource": ["*"]}))],
        )]);
        let permissions = ["dynamodb:BatchGetItem", "dynamodb:GetItem", "dynamodb:Query"];
        assert!(evaluate_policies_against_resource(&p, "arn:aws:dynamodb:us-east-1:1:table/t", &permissions));
    }

    #[test]
    fn test_calculate_permission_relationships() {
        let mut principals = Principals::new();
        principals.insert(
            "arn:aws:iam::1:role/reader".to_string(),
            policies(vec![("read", vec![allow_all_s3()])]),
        );
        principals.insert(
            "arn:aws:iam::1:role/restricted".to_string(),
            policies(vec![
                ("read", vec![allow_all_s3()]),
                (
                    "deny",
                    vec![stmt(json!({"effect": "Deny", "action": ["s3:*"], "resource": [OTHER_BUCKET]}))],
                ),
            ]),
        );
        principals.insert(
            "arn:aws:iam::1:role/nothing".to_string(),
            policies(vec![("none", Vec::new())]),
        );

        let resources = vec![BUCKET.to_string(), OTHER_BUCKET.to_string()];
        let mappings = calculate_permission_relationships(&principals, &resources, &["S3:GetObject"]);

        assert_eq!(
            mappings,
            vec![
                PrincipalMapping {
                    principal_arn: "arn:aws:iam::1:role/reader".to_string(),
                    resource_arn: BUCKET.to_string(),
                },
                PrincipalMapping {
                    principal_arn: "arn:aws:iam::1:role/restricted".to_string(),
                    resource_arn: BUCKET.to_string(),
                },
                PrincipalMapping {
                    principal_arn: "arn:aws:iam::1:role/reader".to_string(),
                    resource_arn: OTHER_BUCKET.to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_calculate_with_no_resources() {
        let mut principals = Principals::new();
        principals.insert("p".to_string(), policies(vec![("read", vec![allow_all_s3()])]));
        assert!(calculate_permission_relationships(&principals, &[], &["s3:GetObject"]).is_empty());
    }
}
