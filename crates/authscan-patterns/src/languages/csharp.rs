//! C# authorization patterns (ASP.NET Core, classic ASP.NET, CAS)

use std::sync::LazyLock;

use authscan_core::ConstructKind::{Attribute, ConditionalCheck, MethodCall};

use crate::rules::{RuleSpec, RuleTable};
use crate::structure::{self, Block, CFamilyOptions, StructureError};

pub(crate) static RULES: LazyLock<RuleTable> = LazyLock::new(|| {
    RuleTable::compile(&[
        RuleSpec::new("authorize_attribute", "authorization", Attribute, r"[\[,]\s*Authorize\b"),
        RuleSpec::new("allow_anonymous", "access_control", Attribute, r"[\[,]\s*AllowAnonymous\b"),
        RuleSpec::new(
            "principal_permission",
            "role_check",
            Attribute,
            r"[\[,]\s*PrincipalPermission(?:Attribute)?\b",
        ),
        RuleSpec::new("is_in_role", "role_check", ConditionalCheck, r"\.IsInRole\s*\("),
        RuleSpec::new(
            "claim_check",
            "permission_check",
            ConditionalCheck,
            r"\.(?:HasClaim|FindFirst|FindFirstValue|HasPermission)\s*\(",
        ),
        RuleSpec::new(
            "authorization_service",
            "authorization",
            MethodCall,
            r"\.AuthorizeAsync\s*\(",
        ),
        RuleSpec::new(
            "policy_builder",
            "access_control",
            MethodCall,
            r"\.(?:RequireRole|RequireClaim|RequireAuthenticatedUser|RequireAssertion|AddPolicy|RequireAuthorization)\s*\(",
        ),
        RuleSpec::new(
            "denial_result",
            "authorization",
            MethodCall,
            r"\b(?:Forbid|Challenge|Unauthorized)\s*\(\s*\)|\bnew\s+(?:UnauthorizedAccessException|SecurityException)\s*\(",
        ),
        RuleSpec::new(
            "identity_check",
            "authentication",
            ConditionalCheck,
            r"\.Identity\s*\??\.\s*IsAuthenticated\b",
        ),
    ])
});

pub(crate) fn blocks(content: &str) -> Result<Vec<Block>, StructureError> {
    structure::brace_blocks(
        content,
        CFamilyOptions {
            verbatim_strings: true,
            text_blocks: true,
            ..Default::default()
        },
    )
}
