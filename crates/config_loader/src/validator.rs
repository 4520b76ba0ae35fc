//! 配置校验模块
//!
//! 校验规则：
//! - resources 非空
//! - resource key 非空且唯一
//! - 数值范围 (inbox_capacity、subscriber_buffer、max_concurrency、rounds 等 >= 1)
//! - 单个 resource 不能同时设置 fail 与 panic

use std::collections::HashSet;

use contracts::{AggregationBlueprint, ContractError};
use validator::Validate;

/// 校验 AggregationBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &AggregationBlueprint) -> Result<(), ContractError> {
    validate_resources_present(blueprint)?;
    validate_resource_keys(blueprint)?;
    validate_ranges(blueprint)?;
    validate_fault_injection(blueprint)?;
    Ok(())
}

/// 至少一个 resource
fn validate_resources_present(blueprint: &AggregationBlueprint) -> Result<(), ContractError> {
    if blueprint.resources.is_empty() {
        return Err(ContractError::config_validation(
            "resources",
            "at least one resource is required",
        ));
    }
    Ok(())
}

/// 校验 key 非空与唯一性
fn validate_resource_keys(blueprint: &AggregationBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, resource) in blueprint.resources.iter().enumerate() {
        if resource.key.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("resources[{idx}].key"),
                "resource key cannot be empty",
            ));
        }
        if !seen.insert(resource.key.as_str()) {
            return Err(ContractError::config_validation(
                format!("resources[key={}]", resource.key),
                "duplicate resource key",
            ));
        }
    }
    Ok(())
}

/// 数值范围 (validator derive 规则)
fn validate_ranges(blueprint: &AggregationBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(|e| {
        let field = e
            .errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "blueprint".to_string());
        ContractError::config_validation(field, e.to_string())
    })
}

/// fail 与 panic 互斥
fn validate_fault_injection(blueprint: &AggregationBlueprint) -> Result<(), ContractError> {
    for resource in &blueprint.resources {
        if resource.fail && resource.panic {
            return Err(ContractError::config_validation(
                format!("resources[key={}]", resource.key),
                "fail and panic cannot both be set",
            ));
        }
    }
    Ok(())
}
