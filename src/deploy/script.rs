use rust_decimal::Decimal;

/// Hardhat script that sends `amount` native units from the first signer to
/// `to_address` and prints `TxHash: <hash>` once mined.
///
/// Both arguments must already be validated: the address as `0x` + 40 hex and
/// the amount as a plain positive decimal. They are embedded as JS literals.
pub fn render_transfer_script(to_address: &str, amount: &Decimal) -> String {
    format!(
        r#"const hre = require("hardhat");

async function main() {{
  const [signer] = await hre.ethers.getSigners();
  console.log("Sender:", signer.address);

  const tx = await signer.sendTransaction({{
    to: "{to_address}",
    value: hre.ethers.parseEther("{amount}")
  }});

  console.log("Waiting for blocks...");
  await tx.wait();
  console.log("TxHash:", tx.hash);
}}

main().catch((error) => {{
  console.error(error);
  process.exitCode = 1;
}});
"#
    )
}
