use crate::types::{Coordinate, SunPosition, ViabilityError};
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Source of the sun's altitude above the horizon, in degrees. Negative
/// values mean the sun is below the horizon.
pub trait SolarAltitudeProvider: Send + Sync {
    fn altitude(
        &self,
        coordinate: Coordinate,
        instant: &DateTime<Utc>,
    ) -> Result<f64, ViabilityError>;
}

/// Low-precision almanac sun position, good to a fraction of a degree.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlmanacSun;

impl SolarAltitudeProvider for AlmanacSun {
    fn altitude(
        &self,
        coordinate: Coordinate,
        instant: &DateTime<Utc>,
    ) -> Result<f64, ViabilityError> {
        let position = SunCalculator::new(coordinate.lat, coordinate.lon).get_position(instant);
        Ok(position.elevation)
    }
}

pub struct SunCalculator {
    latitude: f64,
    longitude: f64,
}

impl SunCalculator {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn get_position(&self, datetime: &DateTime<Utc>) -> SunPosition {
        let (azimuth, elevation) = self.calculate_position(datetime);
        SunPosition {
            azimuth,
            elevation,
            timestamp: *datetime,
        }
    }

    fn calculate_position(&self, datetime: &DateTime<Utc>) -> (f64, f64) {
        let julian_day = self.julian_day(datetime);
        let equation_of_time = self.equation_of_time(julian_day);
        let declination = self.solar_declination(julian_day);

        let solar_time = self.solar_time(datetime, equation_of_time);
        let hour_angle = 15.0 * (solar_time - 12.0);

        let lat_rad = self.latitude.to_radians();
        let dec_rad = declination.to_radians();
        let hour_rad = hour_angle.to_radians();

        let elevation = (lat_rad.sin() * dec_rad.sin()
            + lat_rad.cos() * dec_rad.cos() * hour_rad.cos())
        .clamp(-1.0, 1.0)
        .asin();

        // Measured clockwise from north.
        let cos_azimuth = (dec_rad.sin() * lat_rad.cos()
            - dec_rad.cos() * lat_rad.sin() * hour_rad.cos())
            / elevation.cos();
        let azimuth = cos_azimuth.clamp(-1.0, 1.0).acos();

        let azimuth_deg = if hour_rad.sin() > 0.0 {
            360.0 - azimuth.to_degrees()
        } else {
            azimuth.to_degrees()
        };

        (azimuth_deg, elevation.to_degrees())
    }

    fn julian_day(&self, datetime: &DateTime<Utc>) -> f64 {
        let a = (14 - datetime.month() as i32) / 12;
        let y = datetime.year() + 4800 - a;
        let m = datetime.month() as i32 + 12 * a - 3;

        let day_number = datetime.day() as i32 + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100
            + y / 400
            - 32045;

        // The day number refers to noon; shift by the time of day.
        let day_fraction = (datetime.num_seconds_from_midnight() as f64 - 43_200.0) / 86_400.0;
        day_number as f64 + day_fraction
    }

    fn mean_anomalies(julian_day: f64) -> (f64, f64, f64) {
        let n = julian_day - 2451545.0;
        let l = (280.460 + 0.9856474 * n).rem_euclid(360.0);
        let g = (357.528 + 0.9856003 * n).rem_euclid(360.0).to_radians();
        let lambda = l + 1.915 * g.sin() + 0.020 * (2.0 * g).sin();
        (n, l, lambda)
    }

    /// Minutes of apparent solar time ahead of mean solar time.
    fn equation_of_time(&self, julian_day: f64) -> f64 {
        let (n, l, lambda) = Self::mean_anomalies(julian_day);
        let obliquity = (23.439 - 0.0000004 * n).to_radians();
        let lambda_rad = lambda.to_radians();
        let right_ascension = (obliquity.cos() * lambda_rad.sin())
            .atan2(lambda_rad.cos())
            .to_degrees();

        let difference = (l - 0.0057183 - right_ascension + 180.0).rem_euclid(360.0) - 180.0;
        4.0 * difference
    }

    fn solar_declination(&self, julian_day: f64) -> f64 {
        let (n, _, lambda) = Self::mean_anomalies(julian_day);
        let obliquity = (23.439 - 0.0000004 * n).to_radians();
        (obliquity.sin() * lambda.to_radians().sin())
            .asin()
            .to_degrees()
    }

    fn solar_time(&self, datetime: &DateTime<Utc>, equation_of_time: f64) -> f64 {
        let utc_hours = datetime.num_seconds_from_midnight() as f64 / 3600.0;
        utc_hours + equation_of_time / 60.0 + self.longitude / 15.0
    }
}
