use h3o::{CellIndex, LatLng, Resolution};

use crate::adapters::{AdapterError, SpatialCellIndex};
use crate::models::driver::GeoPoint;

/// H3-backed spatial buckets. Cell ids are the hexadecimal H3 index.
#[derive(Debug, Clone, Copy, Default)]
pub struct H3CellIndex;

impl H3CellIndex {
    pub fn new() -> Self {
        Self
    }

    fn cell(&self, point: &GeoPoint, resolution: u8) -> Result<CellIndex, AdapterError> {
        let resolution = Resolution::try_from(resolution)
            .map_err(|err| AdapterError::InvalidCoordinate(format!("resolution: {err}")))?;
        let latlng = LatLng::new(point.lat, point.lng)
            .map_err(|err| AdapterError::InvalidCoordinate(err.to_string()))?;

        Ok(latlng.to_cell(resolution))
    }
}

impl SpatialCellIndex for H3CellIndex {
    fn cell_for_point(&self, point: &GeoPoint, resolution: u8) -> Result<String, AdapterError> {
        Ok(self.cell(point, resolution)?.to_string())
    }

    fn k_ring_neighbors(
        &self,
        point: &GeoPoint,
        resolution: u8,
        ring_size: u32,
    ) -> Result<Vec<String>, AdapterError> {
        let origin = self.cell(point, resolution)?;
        Ok(origin
            .grid_disk::<Vec<_>>(ring_size)
            .into_iter()
            .map(|cell| cell.to_string())
            .collect())
    }
}
