//! Java / Kotlin authorization patterns (Spring Security, Jakarta EE, Shiro)

use std::sync::LazyLock;

use authscan_core::ConstructKind::{Attribute, ConditionalCheck, MethodCall};

use crate::rules::{RuleSpec, RuleTable};
use crate::structure::{self, Block, CFamilyOptions, StructureError};

pub(crate) static RULES: LazyLock<RuleTable> = LazyLock::new(|| {
    RuleTable::compile(&[
        RuleSpec::new(
            "method_security",
            "authorization",
            Attribute,
            r"@(?:PreAuthorize|PostAuthorize|PreFilter|PostFilter)\s*\(",
        ),
        RuleSpec::new("secured", "role_check", Attribute, r"@Secured\s*\("),
        RuleSpec::new(
            "jsr250",
            "role_check",
            Attribute,
            r"@(?:RolesAllowed|PermitAll|DenyAll)\b",
        ),
        RuleSpec::new(
            "shiro_annotation",
            "permission_check",
            Attribute,
            r"@(?:RequiresPermissions|RequiresRoles|RequiresAuthentication)\b",
        ),
        RuleSpec::new(
            "authority_expression",
            "role_check",
            MethodCall,
            r"\b(?:hasRole|hasAnyRole|hasAuthority|hasAnyAuthority)\s*\(",
        ),
        RuleSpec::new(
            "servlet_role",
            "role_check",
            ConditionalCheck,
            r"\.isUserInRole\s*\(",
        ),
        RuleSpec::new(
            "http_security",
            "access_control",
            MethodCall,
            r"\.(?:authorizeRequests|authorizeHttpRequests|requestMatchers|antMatchers|mvcMatchers|securityMatcher)\s*\(",
        ),
        RuleSpec::new(
            "access_rule",
            "access_control",
            MethodCall,
            r"\.(?:permitAll|denyAll|authenticated|anonymous|fullyAuthenticated)\s*\(\s*\)",
        ),
        RuleSpec::new(
            "security_context",
            "authentication",
            MethodCall,
            r"SecurityContextHolder\s*\.\s*getContext\s*\(",
        ),
        RuleSpec::new(
            "permission_evaluator",
            "permission_check",
            MethodCall,
            r"\b(?:hasPermission|checkPermission|checkRole|isPermitted)\s*\(",
        ),
        RuleSpec::new(
            "access_denied",
            "authorization",
            MethodCall,
            r"\bnew\s+(?:AccessDeniedException|AuthorizationDeniedException|ForbiddenException|UnauthorizedException|SecurityException)\s*\(",
        ),
    ])
});

pub(crate) fn blocks(content: &str) -> Result<Vec<Block>, StructureError> {
    structure::brace_blocks(
        content,
        CFamilyOptions {
            text_blocks: true,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spring_controller() {
        let src = r#"@RestController
public class AccountController {
    @PreAuthorize("hasRole('ADMIN') or #id == principal.id")
    @GetMapping("/accounts/{id}")
    public Account get(@PathVariable long id) {
        return service.find(id);
    }
}
"#;
        assert!(RULES.detect(src));
        let hits: Vec<&str> = RULES.line_hits(src.lines().nth(2).unwrap()).map(|r| r.name).collect();
        assert_eq!(hits, vec!["method_security", "authority_expression"]);
        assert_eq!(blocks(src).unwrap().len(), 2);
    }

    #[test]
    fn test_security_config_chain() {
        let line = "        http.authorizeHttpRequests(auth -> auth.requestMatchers(\"/admin/**\").hasRole(\"ADMIN\"))";
        let hits: Vec<&str> = RULES.line_hits(line).map(|r| r.name).collect();
        assert!(hits.contains(&"http_security"));
        assert!(hits.contains(&"authority_expression"));
    }

    #[test]
    fn test_plain_class_not_detected() {
        assert!(!RULES.detect("public class Point { int x; int y; }\n"));
    }
}
