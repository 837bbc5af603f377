//! JavaScript / TypeScript authorization patterns (Express, Passport, NestJS, CASL)

use std::sync::LazyLock;

use authscan_core::ConstructKind::{Attribute, ConditionalCheck, MethodCall};

use crate::rules::{RuleSpec, RuleTable};
use crate::structure::{self, Block, CFamilyOptions, StructureError};

pub(crate) static RULES: LazyLock<RuleTable> = LazyLock::new(|| {
    RuleTable::compile(&[
        RuleSpec::new(
            "nest_guard",
            "authorization",
            Attribute,
            r"@(?:UseGuards|Roles|Permissions|RequirePermissions|Public)\s*\(",
        ),
        RuleSpec::new(
            "passport",
            "authentication",
            MethodCall,
            r"\bpassport\s*\.\s*authenticate\s*\(",
        ),
        RuleSpec::new("jwt_verify", "authentication", MethodCall, r"\bjwt\s*\.\s*verify\s*\("),
        RuleSpec::new(
            "user_role",
            "role_check",
            ConditionalCheck,
            r"\b(?:req|request|ctx|context|session)\s*\.\s*(?:user|state\.user)\s*\.\s*(?:role|roles|permissions|isAdmin|groups|scopes)\b",
        ),
        RuleSpec::new(
            "permission_helper",
            "permission_check",
            MethodCall,
            r"\b(?:hasPermission|hasRole|hasAnyRole|checkPermission|checkRole|isAuthorized|requireRole|requirePermission)\s*\(",
        ),
        RuleSpec::new(
            "casl_ability",
            "permission_check",
            ConditionalCheck,
            r"\babilit(?:y|ies)\s*\.\s*(?:can|cannot)\s*\(",
        ),
        RuleSpec::new(
            "is_authenticated",
            "authentication",
            ConditionalCheck,
            r"\.isAuthenticated\s*\(",
        ),
        RuleSpec::new(
            "forbidden_response",
            "authorization",
            MethodCall,
            r"\.(?:status|sendStatus)\s*\(\s*40[13]\s*\)|\bnew\s+(?:ForbiddenException|UnauthorizedException|ForbiddenError)\s*\(",
        ),
        RuleSpec::new(
            "guard_contract",
            "authorization",
            MethodCall,
            r"\bcanActivate\s*\(",
        ),
    ])
});

pub(crate) fn blocks(content: &str) -> Result<Vec<Block>, StructureError> {
    structure::brace_blocks(
        content,
        CFamilyOptions {
            template_literals: true,
            regex_literals: true,
            ..Default::default()
        },
    )
}
