fn main() -> anyhow::Result<()> {
    mdao_check::entrypoint()
}
