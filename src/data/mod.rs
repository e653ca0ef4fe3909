/// Data layer: core types, loading, and filtering.
///
/// Architecture:
/// ```text
///  .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Dataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │   Dataset     │  Vec<Row>, ordered column names
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  apply column predicates → row indices
///   └──────────┘
/// ```

pub mod loader;
pub mod model;
pub mod filter;

/// Operator-facing column names of the historical dataset.
pub mod columns {
    pub const FLOW: &str = "Caudal";
    pub const LEVEL: &str = "Nivel TK %";
    pub const DAY: &str = "Día";

    pub const IMAGE_PATH: &str = "imagen_path";
    pub const IMAGE_NUMBER: &str = "imagen_numero";

    pub const STATUS: &str = "status";
    pub const STATUS_SUCCESS: &str = "success";

    pub const SIGMA_PREFIX: &str = "sigma_";
    pub const SIGMA_COMBINED: &str = "sigma_combined";

    pub const BATCH_TYPE: &str = "batch_type";
    pub const BATCH_STABLE: &str = "estable";
    pub const BATCH_TURBULENT: &str = "turbulento";
    pub const BATCH_UNKNOWN: &str = "desconocido";

    pub const INTERFACE_TOP: &str = "thermal_interface_top_px";
    pub const INTERFACE_BOTTOM: &str = "thermal_interface_bottom_px";
    pub const INTERFACE_CONFIDENCE: &str = "thermal_interface_confidence";
    pub const CRUDE_PX: &str = "thermal_crudo_px";
    pub const EMULSION_PX: &str = "thermal_emulsion_px";
    pub const WATER_PX: &str = "thermal_agua_px";
    pub const CRUDE_RATIO: &str = "thermal_crudo_ratio";
    pub const EMULSION_RATIO: &str = "thermal_emulsion_ratio";
    pub const WATER_RATIO: &str = "thermal_agua_ratio";
    pub const TEMP_CRUDE: &str = "thermal_temp_crudo_mean";
    pub const TEMP_EMULSION: &str = "thermal_temp_emulsion_mean";
    pub const TEMP_WATER: &str = "thermal_temp_agua_mean";
    pub const GRADIENT_MAX: &str = "thermal_gradient_max";
    pub const GRADIENT_STD: &str = "thermal_gradient_std";

    pub const TANK_TEMP: &str = "T_TK";
    pub const AMBIENT_TEMP: &str = "T_amb";
    pub const WIND_SPEED: &str = "Velocidad Viento";
    pub const SOLAR_RADIATION: &str = "Radiación Solar";
    pub const RELATIVE_HUMIDITY: &str = "Humedad Relativa";

    pub const DATE: &str = "fecha";
    pub const HOUR: &str = "hora";
    pub const DELTA_T: &str = "delta_t_tank_ambient";
    pub const THERMAL_RELIABILITY: &str = "fiabilidad_termica";
    pub const RELIABILITY_LEVEL: &str = "fiabilidad_categoria";
    pub const OPERATIONAL_STATE: &str = "estado_operacional";
    pub const OUT_OF_RANGE_SUFFIX: &str = "_fuera_rango";

    pub const RELIABILITY_SCORE: &str = "reliability_score";
    pub const RELIABILITY_CATEGORY: &str = "reliability_category";

    /// Layer names paired with their ratio column.
    pub const LAYER_RATIOS: [(&str, &str); 3] = [
        ("crudo", CRUDE_RATIO),
        ("emulsion", EMULSION_RATIO),
        ("agua", WATER_RATIO),
    ];

    /// Name of the 0/1 flag marking a layer ratio outside its limits.
    pub fn out_of_range_of(layer: &str) -> String {
        format!("{layer}{OUT_OF_RANGE_SUFFIX}")
    }

    /// Name of the sigma column derived from a signal column.
    pub fn sigma_of(signal: &str) -> String {
        format!("{SIGMA_PREFIX}{signal}")
    }
}
