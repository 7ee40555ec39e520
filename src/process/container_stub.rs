use std::process::Child;

use anyhow::{self, bail};

use super::Containment;

#[derive(Debug)]
pub struct Container;

impl Container {
    pub fn create(_containment: &Containment) -> anyhow::Result<Container> {
        bail!("cgroups only available on linux")
    }

    pub fn add(&self, _child: &Child) -> anyhow::Result<()> {
        Ok(())
    }

    pub fn kill(&self) -> anyhow::Result<()> {
        Ok(())
    }

    pub fn release(self) {}
}
