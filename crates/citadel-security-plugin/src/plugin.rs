use async_trait::async_trait;
use citadel_core::plugins::{BoxError, NodeMetadata, NodePlugin};
use citadel_core::runtimes::Inputs;
use serde_json::{json, Value};

use crate::operations::{self, Operation};

/// Node plugin for hashing, signing and symmetric encryption.
pub struct SecurityPlugin;

fn string_input<'a>(inputs: &'a Inputs, key: &str, default: &'a str) -> &'a str {
    inputs.get(key).and_then(Value::as_str).unwrap_or(default)
}

impl SecurityPlugin {
    pub fn run(&self, inputs: &Inputs) -> Result<Inputs, operations::SecurityError> {
        let operation = Operation::parse(string_input(inputs, "operation", "hash"))?;
        let algorithm = string_input(inputs, "algorithm", default_algorithm(operation));
        let key = string_input(inputs, "secret_key", "");
        let data = string_input(inputs, "data", "");

        let mut output = Inputs::new();
        output.insert("success".to_string(), json!(true));
        match operation {
            Operation::Hash => {
                output.insert("result".to_string(), json!(operations::hash(data, algorithm, key)?));
            }
            Operation::Sign => {
                output.insert("signature".to_string(), json!(operations::sign(data, algorithm, key)?));
            }
            Operation::Verify => {
                let signature = string_input(inputs, "signature", "");
                let verified = operations::verify(data, signature, algorithm, key)?;
                output.insert("verified".to_string(), json!(verified));
            }
            Operation::Encrypt => {
                let sealed = operations::encrypt(data, algorithm, key)?;
                output.insert("output_size".to_string(), json!(sealed.len()));
                output.insert("encrypted_data".to_string(), json!(sealed));
            }
            Operation::Decrypt => {
                let plaintext = operations::decrypt(data, algorithm, key)?;
                output.insert("output_size".to_string(), json!(plaintext.len()));
                output.insert("decrypted_data".to_string(), json!(plaintext));
            }
        }
        output.insert("algorithm".to_string(), json!(algorithm));
        output.insert("operation".to_string(), json!(operation.as_str()));
        output.insert("input_size".to_string(), json!(data.len()));
        output.insert("timestamp".to_string(), json!(chrono::Utc::now().timestamp()));
        Ok(output)
    }
}

fn default_algorithm(operation: Operation) -> &'static str {
    match operation {
        Operation::Hash => "sha256",
        Operation::Sign | Operation::Verify => "hmac_sha256",
        Operation::Encrypt | Operation::Decrypt => "aes256",
    }
}

#[async_trait]
impl NodePlugin for SecurityPlugin {
    async fn execute(&self, inputs: Inputs) -> Result<Inputs, BoxError> {
        let output = self.run(&inputs)?;
        log::debug!(
            "{} completed",
            output.get("operation").and_then(Value::as_str).unwrap_or_default()
        );
        Ok(output)
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "title": "Security Operation",
                    "enum": ["hash", "encrypt", "decrypt", "sign", "verify"],
                    "default": "hash"
                },
                "algorithm": {
                    "type": "string",
                    "title": "Algorithm",
                    "enum": ["sha256", "sha512", "aes256", "hmac_sha256", "bcrypt"],
                    "default": "sha256"
                },
                "secret_key": {
                    "type": "string",
                    "title": "Secret Key",
                    "description": "Key for encryption and signing"
                },
                "signature": {
                    "type": "string",
                    "title": "Signature",
                    "description": "Hex signature to check when verifying"
                },
                "data": {
                    "type": "string",
                    "title": "Input Data",
                    "description": "Data to process"
                }
            },
            "required": ["operation", "data"]
        })
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            id: "security_operation".to_string(),
            name: "Security Operation".to_string(),
            description: "Hashing, signing, verification and symmetric encryption".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            author: "Citadel Agent".to_string(),
            category: "security".to_string(),
        }
    }
}
