//! Python authorization patterns (Django, DRF, Flask, FastAPI)

use std::sync::LazyLock;

use authscan_core::ConstructKind::{Attribute, ConditionalCheck, MethodCall, VariableAssignment};
use authscan_core::ConstructKind;
use regex::Regex;

use crate::rules::{RuleSpec, RuleTable};
use crate::structure::{self, Block, StructureError};

pub(crate) static RULES: LazyLock<RuleTable> = LazyLock::new(|| {
    RuleTable::compile(&[
        RuleSpec::new(
            "login_required",
            "authentication",
            Attribute,
            r"^\s*@(?:[\w]+\.)*(?:login_required|jwt_required|auth_required|authenticated)\b",
        ),
        RuleSpec::new(
            "permission_decorator",
            "authorization",
            Attribute,
            r"^\s*@(?:[\w]+\.)*(?:permission_required|permissions_required|requires_permission|has_permission|permission_classes)\b",
        ),
        RuleSpec::new(
            "role_decorator",
            "role_check",
            Attribute,
            r"^\s*@(?:[\w]+\.)*(?:roles?_required|roles_accepted|requires_roles?|admin_required|staff_member_required|user_passes_test)\b",
        ),
        RuleSpec::new(
            "permission_classes",
            "authorization",
            VariableAssignment,
            r"\b(?:permission_classes|authentication_classes)\s*=",
        ),
        RuleSpec::new("has_perm", "permission_check", MethodCall, r"\.has_perms?\s*\("),
        RuleSpec::new(
            "check_permission",
            "permission_check",
            MethodCall,
            r"\b(?:check_permission|check_object_permissions|has_object_permission|has_permission|require_permission)\s*\(",
        ),
        RuleSpec::new(
            "privileged_flag",
            "role_check",
            ConditionalCheck,
            r"\.is_(?:superuser|staff|admin)\b",
        ),
        RuleSpec::new(
            "role_attribute",
            "role_check",
            ConditionalCheck,
            r"\b(?:user|current_user|request\.user|g\.user)\.(?:role|roles|groups)\b",
        ),
        RuleSpec::new(
            "is_authenticated",
            "authentication",
            ConditionalCheck,
            r"\.is_(?:authenticated|anonymous)\b",
        ),
        RuleSpec::new(
            "access_denied",
            "authorization",
            MethodCall,
            r"\b(?:PermissionDenied|AccessDenied|Forbidden|NotAuthenticated)\b|\babort\s*\(\s*40[13]\b|status_code\s*=\s*(?:status\.HTTP_)?40[13]",
        ),
        RuleSpec::new(
            "fastapi_security",
            "authentication",
            MethodCall,
            r"\b(?:Security|Depends)\s*\(\s*(?:get_current_\w+|oauth2_scheme|verify_\w+)",
        ),
    ])
});

static CONDITIONAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:if|elif|while|assert)\b|\bif\b.+\belse\b").unwrap());

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[A-Za-z_][\w.]*(?:\s*:\s*[^=]+)?\s*(?:=|\+=|\|=)[^=]").unwrap()
});

pub(crate) fn blocks(content: &str) -> Result<Vec<Block>, StructureError> {
    structure::indent_blocks(content)
}

pub(crate) fn classify(line: &str) -> Option<ConstructKind> {
    if CONDITIONAL.is_match(line) {
        Some(ConditionalCheck)
    } else if ASSIGNMENT.is_match(line) {
        Some(VariableAssignment)
    } else {
        None
    }
}
