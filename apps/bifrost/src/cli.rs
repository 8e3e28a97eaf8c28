use clap::Parser;

use bifrost_common::GatewayConfigPatch;

#[derive(Parser)]
#[command(name = "bifrost")]
pub(crate) struct Cli {
    #[arg(long)]
    pub(crate) host: Option<String>,
    #[arg(long)]
    pub(crate) port: Option<u16>,
    #[arg(long)]
    pub(crate) default_stream_buffer: Option<usize>,
    #[arg(long)]
    pub(crate) proxy: Option<String>,
}

impl Cli {
    pub(crate) fn into_patch(self) -> GatewayConfigPatch {
        GatewayConfigPatch {
            host: self.host,
            port: self.port,
            default_stream_buffer: self.default_stream_buffer,
            proxy: self.proxy,
        }
    }
}
