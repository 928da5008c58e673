/// Grid carbon intensity used when a country is not in the table, gCO2eq/kWh
pub const WORLD_AVERAGE_G_PER_KWH: f64 = 475.0;

// ISO 3166-1 alpha-3, name, annual average gCO2eq/kWh of electricity
const COUNTRIES: &[(&str, &str, f64)] = &[
    ("AUS", "Australia", 549.0),
    ("BRA", "Brazil", 98.0),
    ("CAN", "Canada", 170.0),
    ("CHN", "China", 582.0),
    ("DEU", "Germany", 381.0),
    ("ESP", "Spain", 174.0),
    ("FRA", "France", 56.0),
    ("GBR", "United Kingdom", 238.0),
    ("IDN", "Indonesia", 676.0),
    ("IND", "India", 713.0),
    ("ITA", "Italy", 331.0),
    ("JPN", "Japan", 485.0),
    ("KOR", "South Korea", 432.0),
    ("MEX", "Mexico", 424.0),
    ("NOR", "Norway", 30.0),
    ("POL", "Poland", 662.0),
    ("RUS", "Russia", 441.0),
    ("SWE", "Sweden", 41.0),
    ("USA", "United States", 369.0),
    ("ZAF", "South Africa", 709.0),
];

#[derive(Debug, Clone, PartialEq)]
pub struct GridIntensity {
    pub country_name: Option<String>,
    pub g_co2_per_kwh: f64,
}

impl GridIntensity {
    pub fn for_country(iso_code: &str) -> Self {
        let code = iso_code.trim();
        COUNTRIES
            .iter()
            .find(|(iso, _, _)| iso.eq_ignore_ascii_case(code))
            .map(|(_, name, g)| Self {
                country_name: Some((*name).to_string()),
                g_co2_per_kwh: *g,
            })
            .unwrap_or(Self {
                country_name: None,
                g_co2_per_kwh: WORLD_AVERAGE_G_PER_KWH,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_country() {
        let grid = GridIntensity::for_country("ind");
        assert_eq!(grid.country_name.as_deref(), Some("India"));
        assert_eq!(grid.g_co2_per_kwh, 713.0);
    }

    #[test]
    fn unknown_country_uses_world_average() {
        let grid = GridIntensity::for_country("XXX");
        assert_eq!(grid.country_name, None);
        assert_eq!(grid.g_co2_per_kwh, WORLD_AVERAGE_G_PER_KWH);
    }
}
