fn main() -> anyhow::Result<()> {
    smol::block_on(seal_server::run())
}
