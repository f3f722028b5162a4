//! Planar YUV 4:2:0 frame geometry and the owned frame type.

use std::time::Instant;

/// Dimensions of a planar YUV 4:2:0 image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes in the Y plane.
    #[inline]
    pub fn luma_size(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Bytes in each of the U and V planes.
    #[inline]
    pub fn chroma_size(&self) -> usize {
        self.luma_size() / 4
    }

    /// Total frame size: `width * height * 3 / 2`.
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.luma_size() * 3 / 2
    }
}

/// A single captured frame from the camera.
///
/// Holds one planar YUV 4:2:0 image: the Y plane followed by the U and V
/// planes at quarter resolution.
#[derive(Clone)]
pub struct Frame {
    /// Raw YUV 4:2:0 data.
    data: Vec<u8>,
    geometry: FrameGeometry,
    /// Time the frame was fetched.
    timestamp: Instant,
    /// Monotonic sequence number within the session.
    sequence: u64,
}

impl Frame {
    /// Creates a new frame with the given parameters.
    pub fn new(data: Vec<u8>, geometry: FrameGeometry, sequence: u64) -> Self {
        Self {
            data,
            geometry,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Returns the raw frame bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the frame, returning its bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The Y plane, the only plane motion detection looks at.
    pub fn luma(&self) -> &[u8] {
        let end = self.geometry.luma_size().min(self.data.len());
        &self.data[..end]
    }

    /// The U and V planes, or `None` if the frame is truncated.
    pub fn chroma(&self) -> Option<(&[u8], &[u8])> {
        let luma = self.geometry.luma_size();
        let chroma = self.geometry.chroma_size();
        let u = self.data.get(luma..luma + chroma)?;
        let v = self.data.get(luma + chroma..luma + 2 * chroma)?;
        Some((u, v))
    }

    /// Validates that the buffer size matches the geometry.
    pub fn is_valid(&self) -> bool {
        self.data.len() == self.geometry.frame_size()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.geometry.width)
            .field("height", &self.geometry.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_sizes() {
        let geometry = FrameGeometry::new(640, 480);
        assert_eq!(geometry.luma_size(), 307_200);
        assert_eq!(geometry.chroma_size(), 76_800);
        assert_eq!(geometry.frame_size(), 460_800);
    }

    #[test]
    fn test_frame_creation() {
        let geometry = FrameGeometry::new(640, 480);
        let frame = Frame::new(vec![0u8; geometry.frame_size()], geometry, 1);

        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        assert_eq!(frame.sequence(), 1);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_frame_planes() {
        let geometry = FrameGeometry::new(4, 2);
        let mut data = vec![1u8; 8];
        data.extend_from_slice(&[2, 2, 3, 3]);
        let frame = Frame::new(data, geometry, 0);

        assert_eq!(frame.luma(), &[1u8; 8]);
        assert_eq!(frame.chroma(), Some((&[2u8, 2][..], &[3u8, 3][..])));
    }

    #[test]
    fn test_frame_invalid_size() {
        let frame = Frame::new(vec![0u8; 100], FrameGeometry::new(640, 480), 1);

        assert!(!frame.is_valid());
        assert_eq!(frame.chroma(), None);
    }
}
