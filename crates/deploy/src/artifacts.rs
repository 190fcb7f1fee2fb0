//! Compiled contract artifacts: ABI and creation bytecode.
//!
//! Artifacts are read from a Hardhat `artifacts/` tree (`<Name>.json` files holding
//! `contractName`, `abi` and `bytecode`). Compilation itself happens elsewhere.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi, Param},
    primitives::{Bytes, hex},
};
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ArgSpec;

/// ABI and creation bytecode of one contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub contract_name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    /// Parse a Hardhat artifact document.
    pub fn from_json(content: &str) -> Result<Self> {
        let artifact: Self =
            serde_json::from_str(content).context("Failed to parse contract artifact")?;
        if artifact.bytecode.is_empty() {
            anyhow::bail!(
                "Artifact for `{}` has no creation bytecode (abstract contract or interface?)",
                artifact.contract_name
            );
        }
        Ok(artifact)
    }

    /// Build the creation payload: bytecode followed by the ABI-encoded constructor arguments.
    ///
    /// Each argument is coerced from its string form to the constructor parameter type.
    pub fn init_code(&self, args: &[String]) -> Result<Bytes> {
        let Some(constructor) = self.abi.constructor() else {
            if !args.is_empty() {
                anyhow::bail!(
                    "`{}` has no constructor but {} argument(s) were given",
                    self.contract_name,
                    args.len()
                );
            }
            return Ok(self.bytecode.clone());
        };

        if constructor.inputs.len() != args.len() {
            anyhow::bail!(
                "`{}` constructor takes {} argument(s), {} given",
                self.contract_name,
                constructor.inputs.len(),
                args.len()
            );
        }

        let values = coerce_all(&constructor.inputs, args)?;
        let encoded = constructor
            .abi_encode_input(&values)
            .context("Failed to encode constructor arguments")?;

        let mut code = self.bytecode.to_vec();
        code.extend_from_slice(&encoded);
        Ok(code.into())
    }

    /// Check constructor argument templates without resolving them.
    pub fn check_constructor_args(&self, args: &[ArgSpec]) -> Result<()> {
        let inputs = self
            .abi
            .constructor()
            .map_or(&[][..], |constructor| &constructor.inputs[..]);
        check_args(inputs, args)
            .with_context(|| format!("Invalid arguments for the `{}` constructor", self.contract_name))
    }

    /// Find the overload of method `name` taking `arity` arguments.
    pub fn read_method(&self, name: &str, arity: usize) -> Result<&Function> {
        self.abi
            .function(name)
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == arity))
            .with_context(|| {
                format!(
                    "`{}` has no method `{}` taking {} argument(s)",
                    self.contract_name, name, arity
                )
            })
    }
}

/// Argument counts must match and literals must coerce to their parameter type.
///
/// Other templates only resolve at deployment time and are coerced then.
pub fn check_args(params: &[Param], args: &[ArgSpec]) -> Result<()> {
    if params.len() != args.len() {
        anyhow::bail!(
            "expected {} argument(s), {} given",
            params.len(),
            args.len()
        );
    }
    for (param, arg) in params.iter().zip(args) {
        if let ArgSpec::Literal(value) = arg {
            coerce(param, value)?;
        }
    }
    Ok(())
}

fn coerce(param: &Param, arg: &str) -> Result<DynSolValue> {
    let ty: DynSolType = param
        .resolve()
        .with_context(|| format!("Unsupported parameter type `{}`", param.ty))?;
    ty.coerce_str(arg).with_context(|| {
        format!(
            "Cannot use `{}` as `{}` for parameter `{}`",
            arg, param.ty, param.name
        )
    })
}

fn coerce_all(params: &[Param], args: &[String]) -> Result<Vec<DynSolValue>> {
    params
        .iter()
        .zip(args)
        .map(|(param, arg)| coerce(param, arg))
        .collect()
}

/// Calldata for a read, its arguments coerced from their string form.
pub fn read_calldata(function: &Function, args: &[String]) -> Result<Bytes> {
    if function.inputs.len() != args.len() {
        anyhow::bail!(
            "`{}` takes {} argument(s), {} given",
            function.name,
            function.inputs.len(),
            args.len()
        );
    }
    let values = coerce_all(&function.inputs, args)?;
    Ok(function
        .abi_encode_input(&values)
        .context("Failed to encode read calldata")?
        .into())
}

/// Decode a read's return data into `(name, rendered value)` pairs.
///
/// Names come from `names` when given, then from the ABI output names, then `<method>.<index>`.
pub fn decode_read(
    function: &Function,
    data: &[u8],
    names: &[String],
) -> Result<Vec<(String, String)>> {
    let values = function
        .abi_decode_output(data)
        .with_context(|| format!("Failed to decode output of `{}`", function.name))?;

    if !names.is_empty() && names.len() != values.len() {
        anyhow::bail!(
            "`{}` returned {} value(s) but {} output name(s) were declared",
            function.name,
            values.len(),
            names.len()
        );
    }

    Ok(values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let name = names
                .get(i)
                .cloned()
                .or_else(|| {
                    function
                        .outputs
                        .get(i)
                        .map(|p| p.name.clone())
                        .filter(|n| !n.is_empty())
                })
                .unwrap_or_else(|| format!("{}.{}", function.name, i));
            (name, render_value(value))
        })
        .collect())
}

/// Render a decoded value in a form `DynSolType::coerce_str` accepts back.
pub fn render_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(address) => address.to_checksum(None),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Bytes(bytes) => hex::encode_prefixed(bytes),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", inner.join(","))
        }
        other => format!("{other:?}"),
    }
}

/// Provider of compiled artifacts, keyed by contract name.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    artifacts: HashMap<String, ContractArtifact>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every artifact under a Hardhat `artifacts/` directory.
    ///
    /// Debug files (`*.dbg.json`) and JSON files that are not contract artifacts (build info)
    /// are skipped.
    pub fn load_dir(root: &Path) -> Result<Self> {
        let mut store = Self::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = std::fs::read_dir(&dir)
                .with_context(|| format!("Failed to read artifacts directory {}", dir.display()))?;
            for entry in entries {
                let path: PathBuf = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let is_artifact = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".json") && !n.ends_with(".dbg.json"));
                if !is_artifact {
                    continue;
                }

                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                match ContractArtifact::from_json(&content) {
                    Ok(artifact) => {
                        tracing::trace!(path = %path.display(), contract = %artifact.contract_name, "Artifact loaded");
                        store.insert(artifact);
                    }
                    Err(e) => {
                        tracing::trace!(path = %path.display(), error = %e, "Skipping non-artifact JSON");
                    }
                }
            }
        }

        tracing::debug!(root = %root.display(), count = store.artifacts.len(), "Artifacts loaded");
        Ok(store)
    }

    pub fn insert(&mut self, artifact: ContractArtifact) {
        self.artifacts
            .insert(artifact.contract_name.clone(), artifact);
    }

    pub fn get(&self, contract: &str) -> Option<&ContractArtifact> {
        self.artifacts.get(contract)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}
