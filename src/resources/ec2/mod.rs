//! Compute and networking: network, firewall, images, instances, volumes.

pub mod init;
pub mod instance;
pub mod machine_image;
pub mod security_group;
pub mod volume;
pub mod vpc;

pub use init::{
    CloudFormationInit, InitCommand, InitConfig, InitElement, InitFile, InitGroup, InitOptions,
    InitPackage, InitSource, InitUser,
};
pub use instance::{Instance, InstanceProps, InstanceType};
pub use machine_image::{AmazonLinuxGeneration, MachineImage};
pub use security_group::{Peer, Port, Protocol, SecurityGroup, SecurityGroupProps};
pub use volume::{Volume, VolumeProps};
pub use vpc::{Subnet, SubnetType, Vpc, VpcProps};
