//! WASM wrapper around a disk model and the evolution entry point.

use anyhow::{Context, Result};
use serde_wasm_bindgen::{from_value, to_value};
use spindler_core::evolution::{evolve, Trajectory};
use spindler_core::model::{DerivativeModel, ModelKind, Rate};
use spindler_core::solvers::IntegrationSettings;
use spindler_core::tables::ModelTables;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmModel {
    pub(crate) model: Box<dyn DerivativeModel>,
    pub(crate) kind: ModelKind,
}

pub(crate) fn build_model(
    name: &str,
    tables: &ModelTables,
    diagnostics: bool,
) -> Result<(ModelKind, Box<dyn DerivativeModel>)> {
    let kind: ModelKind = name.parse()?;
    let model = kind
        .build(tables, diagnostics)
        .with_context(|| format!("Failed to build {kind} model"))?;
    Ok((kind, model))
}

pub(crate) fn compute_rates(
    model: &dyn DerivativeModel,
    rate: &str,
    q: &[f64],
    e: &[f64],
) -> Result<Vec<f64>> {
    let rate: Rate = rate.parse()?;
    Ok(model.rates(rate, q, e)?)
}

pub(crate) fn run_evolution(
    model: &dyn DerivativeModel,
    accreted_mass: f64,
    q0: f64,
    e0: f64,
    settings: &IntegrationSettings,
) -> Result<Trajectory> {
    evolve(model, accreted_mass, q0, e0, settings)
        .with_context(|| format!("Evolution with {} failed", model.name()))
}

fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

#[wasm_bindgen]
impl WasmModel {
    /// `tables` is a serialized table set tagged by `layout`
    /// (`"general"` or `"equal_mass"`).
    #[wasm_bindgen(constructor)]
    pub fn new(name: &str, tables: JsValue, diagnostics: bool) -> Result<WasmModel, JsValue> {
        console_error_panic_hook::set_once();

        let tables: ModelTables = from_value(tables)
            .map_err(|e| JsValue::from_str(&format!("Invalid model tables: {}", e)))?;
        let (kind, model) = build_model(name, &tables, diagnostics).map_err(to_js_error)?;
        Ok(WasmModel { model, kind })
    }

    pub fn name(&self) -> String {
        self.kind.name().to_string()
    }

    /// Logarithmic rate `rate` (`a`, `e`, `q`, `E` or `J`) at each `(q, e)`;
    /// a length-one input is broadcast against the other.
    pub fn rate(&self, rate: &str, q: Vec<f64>, e: Vec<f64>) -> Result<Vec<f64>, JsValue> {
        compute_rates(self.model.as_ref(), rate, &q, &e).map_err(to_js_error)
    }

    /// Runs an evolution and returns the trajectory. `settings` may be
    /// `undefined`, `null` or a partial settings object.
    pub fn evolve(
        &self,
        accreted_mass: f64,
        q0: f64,
        e0: f64,
        settings: JsValue,
    ) -> Result<JsValue, JsValue> {
        let settings: IntegrationSettings = if settings.is_undefined() || settings.is_null() {
            IntegrationSettings::default()
        } else {
            from_value(settings)
                .map_err(|e| JsValue::from_str(&format!("Invalid integration settings: {}", e)))?
        };

        let trajectory = run_evolution(self.model.as_ref(), accreted_mass, q0, e0, &settings)
            .map_err(to_js_error)?;
        to_value(&trajectory)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

/// Names accepted by the `WasmModel` constructor.
#[wasm_bindgen(js_name = modelNames)]
pub fn model_names() -> Vec<String> {
    ModelKind::ALL
        .iter()
        .map(|kind| kind.name().to_string())
        .collect()
}


#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::tests::equal_mass_tables;
    use super::WasmModel;
    use serde::Serialize;
    use serde_wasm_bindgen::{from_value, to_value};
    use spindler_core::evolution::Trajectory;
    use wasm_bindgen::JsValue;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[derive(Serialize)]
    struct PartialSettings {
        method: &'static str,
        rtol: f64,
    }

    fn dd21() -> WasmModel {
        let tables = to_value(&equal_mass_tables()).expect("tables");
        WasmModel::new("DD21", tables, false).expect("model")
    }

    fn error_message(err: JsValue) -> String {
        err.as_string().unwrap_or_default()
    }

    #[wasm_bindgen_test]
    fn constructor_accepts_serialized_tables() {
        assert_eq!(dd21().name(), "DD21");
    }

    #[wasm_bindgen_test]
    fn constructor_rejects_malformed_tables() {
        let message = WasmModel::new("DD21", JsValue::from_str("not tables"), false)
            .err()
            .map(error_message)
            .unwrap_or_default();
        assert!(message.contains("Invalid model tables"), "{message}");
    }

    #[wasm_bindgen_test]
    fn evolve_uses_defaults_for_missing_settings() {
        let model = dd21();
        let from_undefined: Trajectory =
            from_value(model.evolve(10.0, 1.0, 0.1, JsValue::UNDEFINED).expect("evolve"))
                .expect("trajectory");
        let from_null: Trajectory =
            from_value(model.evolve(10.0, 1.0, 0.1, JsValue::NULL).expect("evolve"))
                .expect("trajectory");

        assert_eq!(from_undefined, from_null);
        assert_eq!(from_undefined.m[0], 1.0);
        assert_eq!(*from_undefined.m.last().expect("final mass"), 11.0);
        assert_eq!(from_undefined.len(), from_undefined.e.len());
        let end = from_undefined.final_state().expect("final state");
        assert!((end.e - 0.4).abs() < 0.01);
    }

    #[wasm_bindgen_test]
    fn evolve_fills_partial_settings_with_defaults() {
        let model = dd21();
        let defaults: Trajectory =
            from_value(model.evolve(10.0, 1.0, 0.1, JsValue::UNDEFINED).expect("evolve"))
                .expect("trajectory");
        let settings = to_value(&PartialSettings {
            method: "tsit5",
            rtol: 1e-6,
        })
        .expect("settings");
        let tight: Trajectory = from_value(model.evolve(10.0, 1.0, 0.1, settings).expect("evolve"))
            .expect("trajectory");

        assert_eq!(*tight.m.last().expect("final mass"), 11.0);
        assert!(tight.stats.accepted > defaults.stats.accepted);
        assert_eq!(tight.stats.method_switches, 0);
    }

    #[wasm_bindgen_test]
    fn evolve_reports_bad_settings() {
        let model = dd21();
        let message = model
            .evolve(10.0, 1.0, 0.1, JsValue::from_str("fast"))
            .err()
            .map(error_message)
            .unwrap_or_default();
        assert!(message.contains("Invalid integration settings"), "{message}");

        let settings = to_value(&PartialSettings {
            method: "auto",
            rtol: -1.0,
        })
        .expect("settings");
        let message = model
            .evolve(10.0, 1.0, 0.1, settings)
            .err()
            .map(error_message)
            .unwrap_or_default();
        assert!(message.contains("rtol"), "{message}");
    }

    #[wasm_bindgen_test]
    fn rate_rejects_unknown_rate_names() {
        let message = dd21()
            .rate("x", vec![1.0], vec![0.1])
            .err()
            .map(error_message)
            .unwrap_or_default();
        assert!(message.contains("unknown rate"), "{message}");
    }
}
