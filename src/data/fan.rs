use measurements::AngularVelocity;

#[derive(Debug, Clone, PartialEq)]
pub struct FanData {
    /// Fan number as labelled by the firmware (`Fan1`, `Fan2`, ...), starting at 1
    pub position: u8,
    /// Measured fan speed
    pub rpm: AngularVelocity,
}
