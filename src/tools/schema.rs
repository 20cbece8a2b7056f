//! 工具参数 schema 与解析（schemars 自动生成 JSON Schema）

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 由参数结构体生成 JSON Schema（去掉 $schema / title 等冗余顶层字段）
pub fn parameters_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| Value::Object(Default::default()));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// 把模型给出的 args 解析为参数结构体，失败信息直接作为工具错误返回给模型
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments for {tool}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Debug, Deserialize, JsonSchema)]
    struct Args {
        /// 路径
        path: String,
        limit: Option<usize>,
    }

    #[test]
    fn test_parameters_for() {
        let schema = parameters_for::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        assert_eq!(schema["required"], serde_json::json!(["path"]));
    }

    #[test]
    fn test_parse_args_error_names_tool() {
        let err = parse_args::<Args>("read_file", serde_json::json!({"limit": 3})).unwrap_err();
        assert!(err.starts_with("Invalid arguments for read_file"));
    }
}
