//! CloudFront distribution in front of the load balancer.
//!
//! Static UI content uses the managed CachingOptimized policy. API paths use
//! a custom policy that keys on the `authorization` header and every query
//! string with a default TTL of zero, so responses are only cached when the
//! origin asks for it.

use cvat_core::{ConstructPath, Expr, Pseudo, Resource, Result, Template};

use crate::load_balancer::LoadBalancer;

/// Managed policy `Managed-CachingOptimized`.
pub const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";
/// Managed origin request policy `Managed-AllViewer`.
pub const ALL_VIEWER_POLICY_ID: &str = "216adef6-5c7f-47e4-b989-5492eafa07d3";

/// Paths served by the API cache behaviour.
pub const API_PATH_PATTERNS: &[&str] = &[
    "/api/*",
    "/git/*",
    "/opencv/*",
    "/analytics/*",
    "/admin*",
    "/documentation/*",
    "/django-rq*",
];

const ALL_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS", "PUT", "PATCH", "POST", "DELETE"];

#[derive(Debug, Clone)]
pub struct Cdn {
    pub path: ConstructPath,
    pub distribution_id: String,
    pub cache_policy_id: String,
}

impl Cdn {
    pub fn new(template: &mut Template, path: ConstructPath, origin: &LoadBalancer) -> Result<Self> {
        let policy_path = path.child("CachePolicy");
        let cache_policy_id = template.add_resource(
            &policy_path,
            Resource::new("AWS::CloudFront::CachePolicy").prop(
                "CachePolicyConfig",
                Expr::map([
                    ("Comment", Expr::str(policy_path.to_string())),
                    ("DefaultTTL", Expr::Int(0)),
                    ("MaxTTL", Expr::Int(3600)),
                    ("MinTTL", Expr::Int(0)),
                    (
                        "Name",
                        Expr::concat([
                            Expr::Pseudo(Pseudo::StackName),
                            Expr::str(format!("-{}-CachePolicy-", path.id())),
                            Expr::Pseudo(Pseudo::Region),
                        ]),
                    ),
                    (
                        "ParametersInCacheKeyAndForwardedToOrigin",
                        Expr::map([
                            ("CookiesConfig", Expr::map([("CookieBehavior", Expr::str("none"))])),
                            ("EnableAcceptEncodingBrotli", Expr::Bool(true)),
                            ("EnableAcceptEncodingGzip", Expr::Bool(true)),
                            (
                                "HeadersConfig",
                                Expr::map([
                                    ("HeaderBehavior", Expr::str("whitelist")),
                                    ("Headers", Expr::list(["authorization"])),
                                ]),
                            ),
                            (
                                "QueryStringsConfig",
                                Expr::map([("QueryStringBehavior", Expr::str("all"))]),
                            ),
                        ]),
                    ),
                ]),
            ),
        )?;

        let distribution_path = path.child("Distribution");
        let origin_id = distribution_path.child("Origin1").logical_id();
        let behavior = |cache_policy: Expr, path_pattern: Option<&str>| {
            let mut entries = vec![
                ("AllowedMethods", Expr::list(ALL_METHODS.iter().copied())),
                ("CachePolicyId", cache_policy),
                ("CachedMethods", Expr::list(["GET", "HEAD"])),
                ("Compress", Expr::Bool(true)),
                ("OriginRequestPolicyId", Expr::str(ALL_VIEWER_POLICY_ID)),
                ("TargetOriginId", Expr::str(&origin_id)),
                ("ViewerProtocolPolicy", Expr::str("redirect-to-https")),
            ];
            if let Some(pattern) = path_pattern {
                entries.push(("PathPattern", Expr::str(pattern)));
            }
            Expr::map(entries)
        };
        let api_behaviors = API_PATH_PATTERNS
            .iter()
            .map(|p| behavior(Expr::reference(&cache_policy_id), Some(*p)))
            .collect();

        let distribution_id = template.add_resource(
            &distribution_path,
            Resource::new("AWS::CloudFront::Distribution").prop(
                "DistributionConfig",
                Expr::map([
                    ("CacheBehaviors", Expr::List(api_behaviors)),
                    ("Comment", Expr::str(distribution_path.to_string())),
                    (
                        "DefaultCacheBehavior",
                        behavior(Expr::str(CACHING_OPTIMIZED_POLICY_ID), None),
                    ),
                    ("Enabled", Expr::Bool(true)),
                    ("HttpVersion", Expr::str("http2and3")),
                    ("IPV6Enabled", Expr::Bool(true)),
                    (
                        "Origins",
                        Expr::list([Expr::map([
                            (
                                "CustomOriginConfig",
                                Expr::map([
                                    ("OriginProtocolPolicy", Expr::str("http-only")),
                                    ("OriginSSLProtocols", Expr::list(["TLSv1.2"])),
                                ]),
                            ),
                            ("DomainName", origin.dns_name()),
                            ("Id", Expr::str(&origin_id)),
                        ])]),
                    ),
                ]),
            ),
        )?;

        Ok(Self {
            path,
            distribution_id,
            cache_policy_id,
        })
    }

    /// The `*.cloudfront.net` domain of the distribution.
    pub fn domain_name(&self) -> Expr {
        Expr::att(&self.distribution_id, "DomainName")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Vpc;
    use cvat_core::config::NetworkConfig;

    #[test]
    fn distribution_layout() {
        let mut t = Template::new();
        let root = ConstructPath::root("T");
        let vpc = Vpc::new(&mut t, root.child("VPC"), &NetworkConfig::default()).unwrap();
        let lb = LoadBalancer::new(&mut t, root.child("LoadBalancer"), &vpc).unwrap();
        let cdn = Cdn::new(&mut t, root.child("CDN"), &lb).unwrap();

        let dist = t.resource(&cdn.distribution_id).unwrap();
        assert_eq!(
            dist.property("DistributionConfig.HttpVersion").and_then(Expr::as_str),
            Some("http2and3")
        );
        assert_eq!(
            dist.property("DistributionConfig.DefaultCacheBehavior.CachePolicyId")
                .and_then(Expr::as_str),
            Some(CACHING_OPTIMIZED_POLICY_ID)
        );
        assert_eq!(
            dist.property("DistributionConfig.Origins.0.DomainName"),
            Some(&lb.dns_name())
        );
        let behaviors = dist
            .property("DistributionConfig.CacheBehaviors")
            .and_then(Expr::as_list)
            .unwrap();
        assert_eq!(behaviors.len(), API_PATH_PATTERNS.len());
        assert_eq!(
            dist.property("DistributionConfig.CacheBehaviors.0.CachePolicyId"),
            Some(&Expr::reference(&cdn.cache_policy_id))
        );

        let policy = t.resource(&cdn.cache_policy_id).unwrap();
        assert_eq!(policy.property("CachePolicyConfig.MaxTTL"), Some(&Expr::Int(3600)));
        assert_eq!(policy.property("CachePolicyConfig.DefaultTTL"), Some(&Expr::Int(0)));
        t.validate().unwrap();
    }
}
